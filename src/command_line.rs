// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Command line argument parsing, with a focus on matching the historical
//! subverb's flags.

use crate::plan::{PlanError, ResourceOverrides, VmRequest, VmRole};
use clap::Parser;
use std::path::PathBuf;

/// Where the acceleration firmware package unpacks its artifacts, relative
/// to the workspace the tool runs from.
const DEFAULT_FIRMWARE_DIR: &str = "acceleration/firmware/select";

/// Arg parser.
///
/// The kernel-variant flags are kept as plain strings here; conversion to
/// [`VmRequest`] happens through the accessors below so an unknown variant
/// surfaces as the planner's diagnostic rather than a clap usage error.
#[derive(Parser, Debug)]
#[command(version, about = "Assemble a bootable Xen SD-card image")]
pub struct Args {
    /// Kernel variant for dom0: vanilla or preempt_rt
    #[arg(long)]
    pub dom0: Option<String>,

    /// Kernel variant for a domU guest; repeat once per guest
    #[arg(long = "domU")]
    pub domu: Vec<String>,

    /// Kernel variant for a dom0less guest; repeat once per guest
    #[arg(long)]
    pub dom0less: Vec<String>,

    /// Rootfs for VMs, including dom0's; consumed in order by dom0, then
    /// each domU
    #[arg(long)]
    pub rootfs: Vec<PathBuf>,

    /// Ramdisks for dom0less VMs; dom0's must not be included
    #[arg(long)]
    pub ramdisk: Vec<PathBuf>,

    /// Root of the firmware artifact collection
    #[arg(long, default_value = DEFAULT_FIRMWARE_DIR)]
    pub firmware_dir: PathBuf,

    /// Keep the work directory and show the generated configuration
    #[arg(long)]
    pub debug: bool,
}

impl Args {
    pub fn dom0_request(&self) -> Result<Option<VmRequest>, PlanError> {
        self.dom0
            .as_deref()
            .map(|value| VmRequest::parse(VmRole::Dom0, value))
            .transpose()
    }

    pub fn domu_requests(&self) -> Result<Vec<VmRequest>, PlanError> {
        self.domu
            .iter()
            .map(|value| VmRequest::parse(VmRole::DomU, value))
            .collect()
    }

    pub fn dom0less_requests(&self) -> Result<Vec<VmRequest>, PlanError> {
        self.dom0less
            .iter()
            .map(|value| VmRequest::parse(VmRole::Dom0less, value))
            .collect()
    }

    pub fn overrides(&self) -> ResourceOverrides {
        ResourceOverrides {
            rootfs: self.rootfs.clone(),
            ramdisks: self.ramdisk.clone(),
        }
    }
}
