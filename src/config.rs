// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Rendering of a [`BuildPlan`] into the imagebuilder configuration text,
//! plus a parser for the same line-oriented format.
//!
//! The field names are consumed by the external `uboot-script-gen` and
//! `disk_image` scripts and must match them exactly.

use std::fmt::Write;

use anyhow::{bail, Context, Result};

use crate::plan::{BuildPlan, GuestPayload};

/// Fixed board description; identical for every plan on this target.
const BOARD_HEADER: &str = "\
MEMORY_START=0x0
MEMORY_END=0x80000000
DEVICE_TREE=system.dtb
BOOTBIN=BOOT.BIN
XEN=xen
UBOOT_SOURCE=boot.source
UBOOT_SCRIPT=boot.scr
";

/// One `KEY=VALUE` or `KEY[index]="value"` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLine {
    pub key: String,
    pub index: Option<usize>,
    pub value: String,
}

/// Render `plan` as imagebuilder configuration text.
pub fn render(plan: &BuildPlan) -> String {
    let mut out = String::from(BOARD_HEADER);

    // Writing into a String cannot fail, so the unwraps below are fine.
    writeln!(out, "DOM0_KERNEL={}", plan.dom0_kernel.kernel_image_name()).unwrap();
    writeln!(out, "DOM0_ROOTFS={}", plan.dom0_rootfs().display()).unwrap();

    for entry in plan.guests() {
        let i = entry.index;
        writeln!(out, "DOMU_KERNEL[{i}]=\"{}\"", entry.kernel.kernel_image_name()).unwrap();
        match &entry.payload {
            GuestPayload::Rootfs(path) => {
                writeln!(out, "DOMU_ROOTFS[{i}]=\"{}\"", path.display()).unwrap();
            }
            GuestPayload::Ramdisk(path) => {
                writeln!(out, "DOMU_RAMDISK[{i}]=\"{}\"", path.display()).unwrap();
            }
        }
        if entry.no_autoboot {
            writeln!(out, "DOMU_NOBOOT[{i}]=y").unwrap();
        }
    }

    writeln!(out, "NUM_DOMUS={}", plan.total_vm_count).unwrap();
    out
}

/// Parse configuration text back into its lines. Empty lines are skipped.
pub fn parse(text: &str) -> Result<Vec<ConfigLine>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> Result<ConfigLine> {
    let (lhs, value) = line
        .split_once('=')
        .with_context(|| format!("malformed configuration line: {line}"))?;

    let (key, index) = match lhs.split_once('[') {
        Some((key, rest)) => {
            let index = rest
                .strip_suffix(']')
                .with_context(|| format!("malformed array key: {lhs}"))?
                .parse::<usize>()
                .with_context(|| format!("malformed array index: {lhs}"))?;
            (key, Some(index))
        }
        None => (lhs, None),
    };
    if key.is_empty() {
        bail!("malformed configuration line: {line}");
    }

    let value = match value.strip_prefix('"') {
        Some(rest) => rest
            .strip_suffix('"')
            .with_context(|| format!("unterminated quote in: {line}"))?,
        None => value,
    };

    Ok(ConfigLine {
        key: key.to_owned(),
        index,
        value: value.to_owned(),
    })
}
