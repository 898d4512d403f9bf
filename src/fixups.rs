// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Xen compatibility fixups for the freshly written rootfs partitions.
//!
//! The rootfs images shipped with the firmware collection boot a bare serial
//! getty and lack the Xen runtime directory; both are patched in place on
//! the assembled SD-card image.

use std::path::Path;

use anyhow::{Context, Result};
use log::info;

use crate::mount::{FsType, LoopDevice, Mount};

/// Partition holding dom0's rootfs. Partition 1 is the boot partition.
pub const DOM0_ROOTFS_PARTITION: u32 = 2;

/// Rootfs partitions for domU guests follow dom0's.
pub const FIRST_DOMU_PARTITION: u32 = 3;

/// Xen expects this directory to exist at runtime; the stock rootfs lacks it.
const XEN_RUNTIME_DIR: &str = "var/lib/xen";

const INITTAB_PATH: &str = "etc/inittab";

/// The stock serial console line, wired to the physical UART.
const INITTAB_SERIAL_GETTY: &str = "PS0:12345:respawn:/bin/start_getty 115200 ttyPS0 vt102";

/// Under Xen the console is the paravirtual hvc0 instead.
const INITTAB_XEN_CONSOLE: &str = "X0:12345:respawn:/sbin/getty 115200 hvc0";

/// Mount `partition` of the raw image and apply the Xen fixups to it.
pub fn patch_partition(image: &Path, partition: u32) -> Result<()> {
    let loop_dev = LoopDevice::attach(image)?;
    let mount = Mount::mount_by_path(loop_dev.partition_device(partition), FsType::Ext4)
        .with_context(|| format!("unable to mount partition {partition}"))?;

    patch_partition_root(mount.mount_path())
        .with_context(|| format!("fixups failed on partition {partition}"))
}

/// Apply the fixups to the root of a mounted partition.
fn patch_partition_root(root: &Path) -> Result<()> {
    fs_err::create_dir_all(root.join(XEN_RUNTIME_DIR))?;
    info!("created /{} in rootfs", XEN_RUNTIME_DIR);

    rewrite_inittab(&root.join(INITTAB_PATH))?;
    info!("set up /{} for Xen in rootfs", INITTAB_PATH);
    Ok(())
}

/// Point the console line of `inittab` at hvc0. A file that already carries
/// the Xen console line (or no serial getty at all) is left as is.
fn rewrite_inittab(path: &Path) -> Result<()> {
    let contents = fs_err::read_to_string(path)?;
    if !contents.contains(INITTAB_SERIAL_GETTY) {
        return Ok(());
    }

    let patched = contents.replace(INITTAB_SERIAL_GETTY, INITTAB_XEN_CONSOLE);
    fs_err::write(path, patched)?;
    Ok(())
}
