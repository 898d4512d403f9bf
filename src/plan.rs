// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The VM configuration planner.
//!
//! Resolves the requested set of virtual machines and their rootfs/ramdisk
//! overrides into an ordered [`BuildPlan`]: one entry per VM with a stable
//! index, the kernel image each VM boots, and the set of artifacts that must
//! be staged before imagebuilder runs. Pure computation; the only outside
//! contact is existence checks through [`ArtifactStore`].

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use log::warn;
use thiserror::Error;

use crate::firmware::{self, ArtifactStore};

/// Kernel flavor shipped in the firmware collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelVariant {
    Vanilla,
    PreemptRt,
}

impl KernelVariant {
    /// Name of the kernel image file for this variant.
    pub fn kernel_image_name(&self) -> &'static str {
        match self {
            KernelVariant::Vanilla => "Image",
            KernelVariant::PreemptRt => "Image_PREEMPT_RT",
        }
    }
}

/// The role a requested VM plays in the Xen deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmRole {
    Dom0,
    DomU,
    Dom0less,
}

impl fmt::Display for VmRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmRole::Dom0 => f.write_str("dom0"),
            VmRole::DomU => f.write_str("domU"),
            VmRole::Dom0less => f.write_str("dom0less"),
        }
    }
}

/// One requested virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmRequest {
    pub role: VmRole,
    pub variant: KernelVariant,
}

impl VmRequest {
    /// Parse the CLI spelling of a kernel variant for `role`.
    pub fn parse(role: VmRole, value: &str) -> Result<Self, PlanError> {
        let variant = match value {
            "vanilla" => KernelVariant::Vanilla,
            "preempt_rt" => KernelVariant::PreemptRt,
            other => {
                return Err(PlanError::UnrecognizedVariant {
                    role,
                    value: other.to_owned(),
                })
            }
        };
        Ok(Self { role, variant })
    }
}

/// Per-VM rootfs and ramdisk overrides, in the order given on the command
/// line. Rootfs paths are consumed by dom0 and then each domU; ramdisk paths
/// only by dom0less guests. The two sequences are consumed independently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceOverrides {
    pub rootfs: Vec<PathBuf>,
    pub ramdisks: Vec<PathBuf>,
}

/// The filesystem image a guest boots from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestPayload {
    Rootfs(PathBuf),
    Ramdisk(PathBuf),
}

/// One resolved VM in the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfigEntry {
    /// Position in the emitted configuration; dom0 is always 0, guests
    /// follow in request order with no gaps.
    pub index: usize,
    pub role: VmRole,
    pub kernel: KernelVariant,
    pub payload: GuestPayload,
    /// DomU guests are created held, to be started by dom0 tooling.
    pub no_autoboot: bool,
}

/// The resolved, immutable description of the whole build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    pub dom0_kernel: KernelVariant,
    pub entries: Vec<VmConfigEntry>,
    pub total_vm_count: usize,
    /// Firmware-relative paths that must be staged into the work directory:
    /// every referenced kernel image, the default ramdisk and rootfs, and
    /// every override.
    pub staged_artifacts: BTreeSet<PathBuf>,
}

impl BuildPlan {
    /// The rootfs resolved for dom0 (entry 0).
    pub fn dom0_rootfs(&self) -> &Path {
        match &self.entries[0].payload {
            GuestPayload::Rootfs(path) | GuestPayload::Ramdisk(path) => path,
        }
    }

    /// The guest entries (everything after dom0).
    pub fn guests(&self) -> &[VmConfigEntry] {
        &self.entries[1..]
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("no VMs requested; provide a dom0 at least")]
    NoVmsRequested,

    #[error("no dom0 specified, doing nothing")]
    Dom0Missing,

    #[error(
        "more ramdisks provided than dom0less VMs ({ramdisks} > {dom0less}); \
         note that neither dom0's nor domUs' ramdisk may be indicated"
    )]
    TooManyRamdisks { ramdisks: usize, dom0less: usize },

    #[error("more rootfs provided than VMs, including dom0's ({rootfs} > {slots})")]
    TooManyRootfs { rootfs: usize, slots: usize },

    #[error(
        "more rootfs and ramdisks provided than VMs, including dom0's \
         ({overrides} > {slots})"
    )]
    TooManyOverrides { overrides: usize, slots: usize },

    #[error("unrecognized {role} arg \"{value}\" (expected \"vanilla\" or \"preempt_rt\")")]
    UnrecognizedVariant { role: VmRole, value: String },

    #[error("artifact {0} not found in the firmware collection")]
    ArtifactNotFound(PathBuf),
}

/// Validate the request and resolve it into a [`BuildPlan`].
///
/// Fails fast before any staging: every error here leaves the filesystem
/// untouched. Fewer overrides than VM slots is not an error; the remaining
/// slots take the defaults.
pub fn plan(
    dom0: Option<VmRequest>,
    domus: &[VmRequest],
    dom0less: &[VmRequest],
    overrides: &ResourceOverrides,
    store: &dyn ArtifactStore,
) -> Result<BuildPlan, PlanError> {
    if dom0.is_none() && domus.is_empty() && dom0less.is_empty() {
        return Err(PlanError::NoVmsRequested);
    }
    // Guest-only deployments are structurally expressible but not supported:
    // dom0 must be present before any guest is processed.
    let dom0 = dom0.ok_or(PlanError::Dom0Missing)?;

    let guest_slots = domus.len() + dom0less.len();
    validate_overrides(overrides, domus.len(), dom0less.len())?;
    for path in overrides.rootfs.iter().chain(&overrides.ramdisks) {
        if !store.exists(path) {
            return Err(PlanError::ArtifactNotFound(path.clone()));
        }
    }

    let mut entries = Vec::with_capacity(guest_slots + 1);
    let mut staged: BTreeSet<PathBuf> = BTreeSet::new();
    staged.insert(PathBuf::from(firmware::DEFAULT_RAMDISK));
    staged.insert(PathBuf::from(firmware::DEFAULT_ROOTFS));
    staged.extend(overrides.rootfs.iter().cloned());
    staged.extend(overrides.ramdisks.iter().cloned());

    // One shared running index across all roles; dom0 takes 0 and the first
    // rootfs override slot.
    let mut index = 0;
    let mut rootfs_cursor = 0;

    staged.insert(kernel_artifact(dom0.variant));
    entries.push(VmConfigEntry {
        index,
        role: VmRole::Dom0,
        kernel: dom0.variant,
        payload: GuestPayload::Rootfs(next_rootfs(&overrides.rootfs, &mut rootfs_cursor)),
        no_autoboot: false,
    });
    index += 1;

    for request in domus {
        staged.insert(kernel_artifact(request.variant));
        entries.push(VmConfigEntry {
            index,
            role: VmRole::DomU,
            kernel: request.variant,
            payload: GuestPayload::Rootfs(next_rootfs(&overrides.rootfs, &mut rootfs_cursor)),
            no_autoboot: true,
        });
        index += 1;
    }

    // The ramdisk cursor starts fresh: dom0 and domUs never consumed one.
    let mut ramdisk_cursor = 0;
    for request in dom0less {
        let ramdisk = overrides
            .ramdisks
            .get(ramdisk_cursor)
            .cloned()
            .unwrap_or_else(|| PathBuf::from(firmware::DEFAULT_RAMDISK));
        ramdisk_cursor += 1;

        staged.insert(kernel_artifact(request.variant));
        entries.push(VmConfigEntry {
            index,
            role: VmRole::Dom0less,
            kernel: request.variant,
            payload: GuestPayload::Ramdisk(ramdisk),
            no_autoboot: false,
        });
        index += 1;
    }

    Ok(BuildPlan {
        dom0_kernel: dom0.variant,
        entries,
        total_vm_count: guest_slots + 1,
        staged_artifacts: staged,
    })
}

/// The fatal overrun checks, as three non-overlapping predicates, plus the
/// non-fatal "fewer overrides than slots" advisory.
fn validate_overrides(
    overrides: &ResourceOverrides,
    num_domus: usize,
    num_dom0less: usize,
) -> Result<(), PlanError> {
    // Counting dom0, there is one rootfs-or-ramdisk slot per VM.
    let slots = num_domus + num_dom0less + 1;

    if overrides.ramdisks.len() > num_dom0less {
        return Err(PlanError::TooManyRamdisks {
            ramdisks: overrides.ramdisks.len(),
            dom0less: num_dom0less,
        });
    }
    if overrides.rootfs.len() > slots {
        return Err(PlanError::TooManyRootfs {
            rootfs: overrides.rootfs.len(),
            slots,
        });
    }
    let override_count = overrides.rootfs.len() + overrides.ramdisks.len();
    if override_count > slots {
        return Err(PlanError::TooManyOverrides {
            overrides: override_count,
            slots,
        });
    }
    if override_count < slots {
        warn!("more VMs than rootfs and ramdisks provided, remaining slots use defaults");
    }
    Ok(())
}

fn next_rootfs(overrides: &[PathBuf], cursor: &mut usize) -> PathBuf {
    let rootfs = overrides
        .get(*cursor)
        .cloned()
        .unwrap_or_else(|| PathBuf::from(firmware::DEFAULT_ROOTFS));
    *cursor += 1;
    rootfs
}

fn kernel_artifact(variant: KernelVariant) -> PathBuf {
    Path::new(firmware::KERNEL_DIR).join(variant.kernel_image_name())
}
