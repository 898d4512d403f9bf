// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Loop-device attachment and partition mounts for the raw SD-card image.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use log::{error, info};
use nix::mount::{mount, umount, MsFlags};
use tempfile::TempDir;

pub enum FsType {
    Ext4,
    Vfat,
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ext4 => f.write_str("ext4"),
            Self::Vfat => f.write_str("vfat"),
        }
    }
}

/// A raw disk image attached to a loop device, detached on destruction.
///
/// The image is attached with partition scanning so the per-partition nodes
/// (`/dev/loopNpM`) appear alongside the device itself.
pub struct LoopDevice {
    device: PathBuf,
}

impl LoopDevice {
    pub fn attach(image: &Path) -> Result<Self> {
        let mut cmd = Command::new("losetup");
        cmd.args(["--find", "--show", "--partscan"]).arg(image);

        let device = crate::process_util::get_output_as_string(cmd)
            .with_context(|| format!("unable to attach {} to a loop device", image.display()))?;
        let device = PathBuf::from(device.trim());
        info!("attached {} at {}", image.display(), device.display());

        Ok(Self { device })
    }

    /// Device node for one partition of the attached image.
    pub fn partition_device(&self, partition: u32) -> PathBuf {
        let mut name = OsString::from(self.device.as_os_str());
        name.push(format!("p{partition}"));
        PathBuf::from(name)
    }

    fn detach(&self) -> Result<()> {
        info!("detaching {}", self.device.display());
        let mut cmd = Command::new("losetup");
        cmd.arg("--detach").arg(&self.device);
        crate::process_util::log_and_run_command(cmd)?;

        Ok(())
    }
}

impl Drop for LoopDevice {
    fn drop(&mut self) {
        if let Err(err) = self.detach() {
            error!("error detaching {}: {}", self.device.display(), err);
        }
    }
}

/// Mounts a block device to a tempdir and unmounts it on destruction.
pub struct Mount {
    tempdir: TempDir,
}

impl Mount {
    pub fn mount_by_path<P: AsRef<Path>>(path: P, fs_type: FsType) -> Result<Self> {
        let tempdir = TempDir::new()?;
        let flags = MsFlags::MS_NODEV | MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID;
        let fs_str = fs_type.to_string();
        let data: Option<&Path> = None;

        info!(
            "mounting {} to {}; fs type is: {fs_type}",
            path.as_ref().display(),
            tempdir.path().display()
        );
        mount(
            Some(path.as_ref()),
            tempdir.path(),
            Some(Path::new(&fs_str)),
            flags,
            data,
        )?;

        Ok(Self { tempdir })
    }

    pub fn mount_path(&self) -> &Path {
        self.tempdir.path()
    }

    fn umount(&self) -> Result<()> {
        info!("unmounting {}", self.tempdir.path().display());
        umount(self.tempdir.path())?;

        Ok(())
    }
}

impl Drop for Mount {
    fn drop(&mut self) {
        if let Err(err) = self.umount() {
            error!(
                "error unmounting temp directory at {}: {}",
                self.tempdir.path().display(),
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_device_naming() {
        let loop_dev = LoopDevice {
            device: PathBuf::from("/dev/loop4"),
        };
        assert_eq!(loop_dev.partition_device(2), PathBuf::from("/dev/loop4p2"));
        // Leak the struct so Drop doesn't try to detach a device we never
        // attached.
        std::mem::forget(loop_dev);
    }
}
