// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Staging of plan artifacts and invocation of the imagebuilder scripts.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::config;
use crate::firmware::{self, ArtifactStore, FirmwareTree};
use crate::plan::BuildPlan;
use crate::platform::Platform;

/// Work directory the artifacts are compiled in. Kept around when running
/// with `--debug`, removed otherwise.
pub const WORK_DIR: &str = "/tmp/hypervisor";

const CONFIG_FILE: &str = "xen.cfg";
const BOOT_SCRIPT_GEN: &str = "uboot-script-gen";
const DISK_IMAGE: &str = "disk_image";

/// Slack added to each rootfs-backed partition, in MB.
const ROOTFS_SLACK_MB: &str = "500";

/// Executes a [`BuildPlan`]: rotates the previous image, stages every
/// artifact the plan names, writes the configuration, and drives the
/// imagebuilder scripts.
pub struct BuildExecutor<'a> {
    platform: &'a dyn Platform,
    firmware: &'a FirmwareTree,
    work_dir: PathBuf,
}

impl<'a> BuildExecutor<'a> {
    pub fn new(platform: &'a dyn Platform, firmware: &'a FirmwareTree, work_dir: &Path) -> Self {
        Self {
            platform,
            firmware,
            work_dir: work_dir.to_owned(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Run the whole build. Returns the path of the produced image.
    pub fn run(&self, plan: &BuildPlan, debug: bool) -> Result<PathBuf> {
        self.rotate_previous_image()?;
        self.stage_artifacts(plan)?;
        self.write_config(plan, debug)?;
        self.generate_boot_script()?;
        self.build_disk_image()?;
        Ok(self.firmware.sd_image_path())
    }

    /// Remove the work directory. Called on success unless debugging.
    pub fn cleanup(&self) -> Result<()> {
        fs_err::remove_dir_all(&self.work_dir)?;
        Ok(())
    }

    /// Keep the last image around as `sd_card.img.old`, dropping any stale
    /// `.old` from the run before that.
    fn rotate_previous_image(&self) -> Result<()> {
        let image = self.firmware.sd_image_path();
        if !image.exists() {
            return Ok(());
        }

        let old = image.with_extension("img.old");
        if old.exists() {
            warn!("detected previous {}, deleting", old.display());
            fs_err::remove_file(&old)?;
        }
        warn!(
            "detected previous {}, moving to {}",
            image.display(),
            old.display()
        );
        fs_err::rename(&image, &old)?;
        Ok(())
    }

    fn stage_artifacts(&self, plan: &BuildPlan) -> Result<()> {
        fs_err::create_dir_all(&self.work_dir)?;

        // Boot firmware and device tree are staged under the names the
        // configuration header references.
        self.stage_as(Path::new(firmware::BOOT_BIN_SRC), Path::new(firmware::BOOT_BIN))?;
        self.stage_as(Path::new(firmware::XEN_BINARY), Path::new(firmware::XEN_BINARY))?;
        self.stage_as(
            Path::new(firmware::DEVICE_TREE_SRC),
            Path::new(firmware::DEVICE_TREE),
        )?;

        for artifact in &plan.staged_artifacts {
            // Kernels are referenced by file name only; everything else by
            // the same relative path the configuration carries.
            if artifact.starts_with(firmware::KERNEL_DIR) {
                let name = artifact
                    .file_name()
                    .with_context(|| format!("artifact {} has no file name", artifact.display()))?;
                self.stage_as(artifact, Path::new(name))?;
            } else {
                self.stage_as(artifact, artifact)?;
            }
            debug!("staged {}", artifact.display());
        }
        info!("copied all artifacts to {}", self.work_dir.display());
        Ok(())
    }

    fn stage_as(&self, src: &Path, dest: &Path) -> Result<()> {
        let dest = self.work_dir.join(dest);
        if let Some(parent) = dest.parent() {
            fs_err::create_dir_all(parent)?;
        }
        fs_err::copy(self.firmware.path_for(src), dest)?;
        Ok(())
    }

    fn write_config(&self, plan: &BuildPlan, debug: bool) -> Result<()> {
        let text = config::render(plan);
        if debug {
            debug!("generated configuration:\n{text}");
        }
        fs_err::write(self.work_dir.join(CONFIG_FILE), text)?;
        Ok(())
    }

    fn generate_boot_script(&self) -> Result<()> {
        info!("generating boot script");
        let mut cmd = Command::new("bash");
        cmd.arg(self.firmware.imagebuilder_script(BOOT_SCRIPT_GEN))
            .args(["-c", CONFIG_FILE, "-d", ".", "-t", "sd"])
            .current_dir(&self.work_dir);

        self.platform
            .run_command(cmd)
            .context("boot script generation failed")?;
        info!("boot script ready");
        Ok(())
    }

    fn build_disk_image(&self) -> Result<()> {
        info!("creating new sd_card.img, this will take a few seconds, hold on");
        let mut cmd = Command::new("bash");
        cmd.arg(self.firmware.imagebuilder_script(DISK_IMAGE))
            .args(["-c", CONFIG_FILE, "-d", ".", "-t", "sd"])
            .arg("-w")
            .arg(&self.work_dir)
            .arg("-o")
            .arg(self.firmware.sd_image_path())
            .args(["-s", ROOTFS_SLACK_MB])
            .current_dir(&self.work_dir);

        self.platform
            .run_command(cmd)
            .context("disk image creation failed")?;
        info!("image successfully created");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{self, KernelVariant, ResourceOverrides, VmRequest, VmRole};
    use crate::platform::MockPlatform;
    use mockall::Sequence;
    use std::fs;
    use tempfile::TempDir;

    /// Lay out a minimal firmware collection on disk.
    fn firmware_fixture() -> (TempDir, FirmwareTree) {
        let tmpdir = TempDir::new().unwrap();
        let root = tmpdir.path();
        for dir in ["kernel", "bootbin", "device_tree", "imagebuilder/scripts"] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        for file in [
            "kernel/Image",
            "kernel/Image_PREEMPT_RT",
            "bootbin/BOOT.BIN.xen",
            "device_tree/system.dtb.xen",
            "xen",
            "initrd.cpio",
            "rootfs.cpio.gz",
            "tiny.cpio",
        ] {
            fs::write(root.join(file), file).unwrap();
        }
        let tree = FirmwareTree::new(root.to_owned());
        (tmpdir, tree)
    }

    fn sample_plan(tree: &FirmwareTree) -> BuildPlan {
        let dom0 = Some(VmRequest {
            role: VmRole::Dom0,
            variant: KernelVariant::Vanilla,
        });
        let dom0less = [VmRequest {
            role: VmRole::Dom0less,
            variant: KernelVariant::PreemptRt,
        }];
        let overrides = ResourceOverrides {
            rootfs: vec![],
            ramdisks: vec!["tiny.cpio".into()],
        };
        plan::plan(dom0, &[], &dom0less, &overrides, tree).unwrap()
    }

    #[test]
    fn test_stage_artifacts_and_config() {
        let (tmpdir, tree) = firmware_fixture();
        let work_dir = tmpdir.path().join("work");
        let platform = MockPlatform::new();
        let executor = BuildExecutor::new(&platform, &tree, &work_dir);
        let plan = sample_plan(&tree);

        executor.stage_artifacts(&plan).unwrap();
        executor.write_config(&plan, false).unwrap();

        for file in [
            "BOOT.BIN",
            "xen",
            "system.dtb",
            "Image",
            "Image_PREEMPT_RT",
            "initrd.cpio",
            "rootfs.cpio.gz",
            "tiny.cpio",
            "xen.cfg",
        ] {
            assert!(work_dir.join(file).exists(), "missing {file}");
        }
        // Kernels are staged flattened, not under kernel/.
        assert!(!work_dir.join("kernel").exists());

        let cfg = fs::read_to_string(work_dir.join("xen.cfg")).unwrap();
        assert!(cfg.contains("DOM0_KERNEL=Image"));
        assert!(cfg.contains("DOMU_RAMDISK[1]=\"tiny.cpio\""));
        assert!(cfg.contains("NUM_DOMUS=2"));
    }

    #[test]
    fn test_run_invokes_imagebuilder_scripts_in_order() {
        let (tmpdir, tree) = firmware_fixture();
        let work_dir = tmpdir.path().join("work");
        let script_gen = tree.imagebuilder_script(BOOT_SCRIPT_GEN);
        let disk_image = tree.imagebuilder_script(DISK_IMAGE);
        let out_image = tree.sd_image_path();

        let mut platform = MockPlatform::new();
        let mut seq = Sequence::new();
        platform
            .expect_run_command()
            .withf(move |cmd| {
                let args: Vec<_> = cmd.get_args().collect();
                cmd.get_program() == "bash"
                    && args[0] == script_gen.as_os_str()
                    && args[1..] == ["-c", "xen.cfg", "-d", ".", "-t", "sd"]
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let expected_work_dir = work_dir.clone();
        platform
            .expect_run_command()
            .withf(move |cmd| {
                let args: Vec<_> = cmd.get_args().collect();
                cmd.get_program() == "bash"
                    && args[0] == disk_image.as_os_str()
                    && args[1..7] == ["-c", "xen.cfg", "-d", ".", "-t", "sd"]
                    && args[7] == "-w"
                    && args[8] == expected_work_dir.as_os_str()
                    && args[9] == "-o"
                    && args[10] == out_image.as_os_str()
                    && args[11..] == ["-s", "500"]
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let executor = BuildExecutor::new(&platform, &tree, &work_dir);
        let plan = sample_plan(&tree);
        let image = executor.run(&plan, false).unwrap();
        assert_eq!(image, tree.sd_image_path());
    }

    #[test]
    fn test_rotate_previous_image() {
        let (tmpdir, tree) = firmware_fixture();
        fs::write(tree.sd_image_path(), "fresh").unwrap();
        fs::write(tmpdir.path().join("sd_card.img.old"), "stale").unwrap();

        let platform = MockPlatform::new();
        let executor = BuildExecutor::new(&platform, &tree, &tmpdir.path().join("work"));
        executor.rotate_previous_image().unwrap();

        assert!(!tree.sd_image_path().exists());
        let old = fs::read_to_string(tmpdir.path().join("sd_card.img.old")).unwrap();
        assert_eq!(old, "fresh");
    }

    #[test]
    fn test_rotate_without_previous_image() {
        let (_tmpdir, tree) = firmware_fixture();
        let platform = MockPlatform::new();
        let executor = BuildExecutor::new(&platform, &tree, Path::new("/nonexistent/work"));
        executor.rotate_previous_image().unwrap();
    }

    #[test]
    fn test_cleanup_removes_work_dir() {
        let (tmpdir, tree) = firmware_fixture();
        let work_dir = tmpdir.path().join("work");
        let platform = MockPlatform::new();
        let executor = BuildExecutor::new(&platform, &tree, &work_dir);

        executor.stage_artifacts(&sample_plan(&tree)).unwrap();
        assert!(work_dir.exists());
        executor.cleanup().unwrap();
        assert!(!work_dir.exists());
    }
}
