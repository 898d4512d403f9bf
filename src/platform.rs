// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::process_util::{self, ProcessError};
use std::process::Command;

/// Platform abstraction layer.
///
/// The build steps run external scripts through this trait so the tests can
/// verify the exact invocations without touching the system.
#[cfg_attr(test, mockall::automock)]
pub trait Platform {
    /// Run a `Command`, capturing its output.
    ///
    /// The command is logged before running it. An error is returned if the
    /// process fails to launch or exits non-zero; the error carries the
    /// captured stdout/stderr.
    fn run_command(&self, cmd: Command) -> Result<(), ProcessError>;
}

/// Non-test implementation of `Platform`.
pub struct PlatformImpl;

impl Platform for PlatformImpl {
    fn run_command(&self, cmd: Command) -> Result<(), ProcessError> {
        process_util::log_and_run_command(cmd)
    }
}
