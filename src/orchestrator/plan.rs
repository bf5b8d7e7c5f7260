//! Flash plan construction: data-preservation policy, image-to-partition
//! binding and plan invariants.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use crate::error::PlanError;
use crate::firmware::archive;
use crate::models::{normalize_partition_name, ExtractedImage, FirmwareRole, PartitionEntry};
use crate::partition::scatter;

/// One partition to flash and the image that goes into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub partition: PartitionEntry,
    pub image: PathBuf,
    pub role: Option<FirmwareRole>,
}

impl PlanEntry {
    pub fn new(mut partition: PartitionEntry, image: impl Into<PathBuf>, role: Option<FirmwareRole>) -> Self {
        let image = image.into();
        partition.bind_image(image.clone());
        PlanEntry {
            partition,
            image,
            role,
        }
    }
}

/// Ordered partitions to flash in one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashPlan {
    entries: Vec<PlanEntry>,
    pub preserve_user_data: bool,
}

impl FlashPlan {
    /// Build a plan, enforcing its invariants.
    pub fn new(entries: Vec<PlanEntry>, preserve_user_data: bool) -> Result<Self, PlanError> {
        let plan = FlashPlan {
            entries,
            preserve_user_data,
        };
        plan.validate()?;
        Ok(plan)
    }

    /// No duplicate partition, never both CSC and HOME_CSC, at least one entry.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.entries.is_empty() {
            return Err(PlanError::Empty);
        }

        let mut seen = HashSet::new();
        for entry in &self.entries {
            let key = entry.partition.key();
            if !seen.insert(key.clone()) {
                return Err(PlanError::DuplicatePartition(key));
            }
        }

        let has_role = |role| self.entries.iter().any(|e| e.role == Some(role));
        if has_role(FirmwareRole::Csc) && has_role(FirmwareRole::HomeCsc) {
            return Err(PlanError::ConflictingCscRoles);
        }
        Ok(())
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn partition_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.partition.name.as_str()).collect()
    }

    pub fn contains_role(&self, role: FirmwareRole) -> bool {
        self.entries.iter().any(|e| e.role == Some(role))
    }

    /// Re-apply the preservation policy to a prebuilt plan and revalidate it.
    pub fn with_preservation(self, preserve_user_data: bool) -> Result<Self, PlanError> {
        let excluded = if preserve_user_data {
            FirmwareRole::Csc
        } else {
            FirmwareRole::HomeCsc
        };
        let entries = self
            .entries
            .into_iter()
            .filter(|e| e.role != Some(excluded))
            .collect();
        FlashPlan::new(entries, preserve_user_data)
    }
}

/// Partitions whose failure fails the whole session.
///
/// Matching is by upper-cased partition name or by firmware role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalSet {
    pub partitions: BTreeSet<String>,
    pub roles: BTreeSet<FirmwareRole>,
}

impl CriticalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_partitions<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        CriticalSet {
            partitions: names
                .into_iter()
                .map(|n| normalize_partition_name(n.as_ref()))
                .collect(),
            roles: BTreeSet::new(),
        }
    }

    pub fn with_partition(mut self, name: &str) -> Self {
        self.partitions.insert(normalize_partition_name(name));
        self
    }

    pub fn with_role(mut self, role: FirmwareRole) -> Self {
        self.roles.insert(role);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty() && self.roles.is_empty()
    }

    pub fn is_critical(&self, entry: &PlanEntry) -> bool {
        self.partitions.contains(&entry.partition.key())
            || entry.role.map_or(false, |role| self.roles.contains(&role))
    }
}

/// Drop the CSC variant that the preservation flag rules out.
///
/// `preserve_user_data = true` keeps HOME_CSC and drops CSC; `false` keeps
/// CSC and drops HOME_CSC.
pub fn apply_preservation_policy(images: Vec<ExtractedImage>, preserve_user_data: bool) -> Vec<ExtractedImage> {
    let excluded = if preserve_user_data {
        FirmwareRole::Csc
    } else {
        FirmwareRole::HomeCsc
    };
    let before = images.len();
    let kept: Vec<ExtractedImage> = images
        .into_iter()
        .filter(|image| image.role != Some(excluded))
        .collect();
    if kept.len() != before {
        log::info!(
            target: "parsed",
            "[Flash] Preservation policy ({}): skipped {} {} image(s)",
            if preserve_user_data { "keep user data" } else { "full wipe" },
            before - kept.len(),
            excluded
        );
    }
    kept
}

/// Result of binding extracted images to a partition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanBuild {
    pub plan: FlashPlan,
    /// Images that matched no flashable partition
    pub unbound: Vec<PathBuf>,
}

fn find_entry<'a>(table: &'a [PartitionEntry], image: &ExtractedImage) -> Option<&'a PartitionEntry> {
    let file_name = image.file_name();
    table
        .iter()
        .find(|entry| {
            entry
                .flash_file_name()
                .map(|f| f.eq_ignore_ascii_case(&file_name))
                .unwrap_or(false)
        })
        .or_else(|| {
            let hint = normalize_partition_name(&image.partition_hint);
            table.iter().find(|entry| entry.key() == hint)
        })
}

/// Apply the preservation policy, then bind images to partitions in order.
///
/// With a table, each image binds to the entry whose vendor file name
/// matches, else to the entry named like the image. Without a table the
/// image's partition hint becomes the partition name. Entries marked
/// `is_download: false` are never flashed.
pub fn build_plan(
    table: Option<&[PartitionEntry]>,
    images: Vec<ExtractedImage>,
    preserve_user_data: bool,
) -> Result<PlanBuild, PlanError> {
    let images = apply_preservation_policy(images, preserve_user_data);
    let mut entries = Vec::new();
    let mut unbound = Vec::new();

    for image in images {
        // Vendor tools write their input verbatim; compressed images never bind.
        if archive::is_lz4(&image.path) {
            log::warn!(
                "[Flash] {} is still LZ4-compressed, not flashing it",
                image.path.display()
            );
            unbound.push(image.path);
            continue;
        }
        let partition = match table {
            Some(table) => match find_entry(table, &image) {
                Some(entry) if scatter::is_download(entry) => entry.clone(),
                Some(entry) => {
                    log::info!("[Flash] {} is not a download partition, skipping", entry.name);
                    unbound.push(image.path);
                    continue;
                }
                None => {
                    log::warn!(
                        "[Flash] No partition matches {}, not flashing it",
                        image.path.display()
                    );
                    unbound.push(image.path);
                    continue;
                }
            },
            None => PartitionEntry::new(image.partition_hint.clone(), 0, 0),
        };
        entries.push(PlanEntry::new(partition, image.path, image.role));
    }

    let plan = FlashPlan::new(entries, preserve_user_data)?;
    log::info!(
        target: "parsed",
        "[Flash] Plan: {} partition(s): {}",
        plan.len(),
        plan.partition_names().join(", ")
    );
    Ok(PlanBuild { plan, unbound })
}

/// Plan entry for an explicitly named partition and image.
pub fn manual_entry(partition: &str, image: &Path) -> PlanEntry {
    PlanEntry::new(PartitionEntry::new(partition, 0, 0), image, None)
}
