// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Library half of xen-sd-install. The binary in `main.rs` wires these
//! modules together; keeping them in a library target lets the tests
//! exercise every seam without a real SD card.

pub mod builder;
pub mod command_line;
pub mod config;
pub mod firmware;
pub mod fixups;
pub mod logger;
pub mod mount;
pub mod plan;
pub mod platform;
pub mod process_util;
