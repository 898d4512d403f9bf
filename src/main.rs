// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Assemble a bootable Xen SD-card image from pre-built firmware artifacts:
//! plan the VM configuration, stage the artifacts, drive the imagebuilder
//! scripts, and patch the written rootfs partitions for Xen.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::Parser;
use log::{error, info};
use nix::unistd;

use xen_sd_install::builder::{self, BuildExecutor};
use xen_sd_install::command_line::Args;
use xen_sd_install::firmware::FirmwareTree;
use xen_sd_install::plan::{self, PlanError};
use xen_sd_install::platform::PlatformImpl;
use xen_sd_install::{fixups, logger};

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(err) = logger::init(args.debug) {
        eprintln!("failed to initialize logger: {err}");
        return ExitCode::FAILURE;
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            if is_clean_early_exit(&err) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

/// Asking for no VMs, or for guests without a dom0, historically prints the
/// diagnostic and exits cleanly without building anything.
fn is_clean_early_exit(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<PlanError>(),
        Some(PlanError::NoVmsRequested | PlanError::Dom0Missing)
    )
}

fn run(args: &Args) -> Result<()> {
    // Loop mounts and the partition fixups need root.
    if !unistd::Uid::effective().is_root() {
        bail!("xen-sd-install must be run as root");
    }

    let dom0 = args.dom0_request()?;
    let domus = args.domu_requests()?;
    let dom0less = args.dom0less_requests()?;
    let overrides = args.overrides();

    let firmware = FirmwareTree::new(args.firmware_dir.clone());
    let plan = plan::plan(dom0, &domus, &dom0less, &overrides, &firmware)?;

    let platform = PlatformImpl;
    let executor = BuildExecutor::new(&platform, &firmware, Path::new(builder::WORK_DIR));
    let image = executor.run(&plan, args.debug)?;

    fixups::patch_partition(&image, fixups::DOM0_ROOTFS_PARTITION)?;
    for i in 0..domus.len() {
        fixups::patch_partition(&image, i as u32 + fixups::FIRST_DOMU_PARTITION)?;
    }

    if args.debug {
        info!("debug: keeping work directory {}", executor.work_dir().display());
    } else {
        executor.cleanup()?;
    }

    info!("done; image at {}", image.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_early_exits_are_clean() {
        assert!(is_clean_early_exit(&anyhow::Error::new(
            PlanError::NoVmsRequested
        )));
        assert!(is_clean_early_exit(&anyhow::Error::new(PlanError::Dom0Missing)));
    }

    #[test]
    fn test_validation_failures_are_not() {
        assert!(!is_clean_early_exit(&anyhow::Error::new(
            PlanError::TooManyRootfs { rootfs: 3, slots: 2 }
        )));
        assert!(!is_clean_early_exit(&anyhow!("disk image creation failed")));
    }
}
