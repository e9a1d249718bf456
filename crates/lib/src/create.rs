//! Creating boot environments.
//!
//! A new BE is a clone of a snapshot: either a fresh timestamped
//! snapshot of the activated BE, or an existing dataset/snapshot named
//! by the caller. With a boot pool mirror configured, the mirrored
//! dataset goes through the same snapshot-and-clone sequence with the
//! same suffix.

use crate::errors::{err, Result};
use crate::handle::{leaf_name, Handle};
use crate::store::{self, DatasetKind};

/// Options for [`Handle::create`].
#[derive(Debug, Default)]
pub struct CreateOptions {
    /// Name of the boot environment to create.
    pub be_name: String,
    /// Clone from this existing dataset or `dataset@snapshot` instead
    /// of snapshotting the activated BE.
    pub existing: Option<String>,
    /// Snapshot and clone the whole dataset tree of the source.
    pub recursive: bool,
}

impl CreateOptions {
    pub fn new(be_name: impl Into<String>) -> Self {
        Self {
            be_name: be_name.into(),
            ..Default::default()
        }
    }
}

impl Handle {
    /// Create a new boot environment.
    pub fn create(&self, options: &CreateOptions) -> Result<()> {
        let new_be = self.be_dataset(&options.be_name)?;
        if self.zfs().dataset_exists(&new_be, DatasetKind::Filesystem)? {
            return Err(err!(
                AlreadyExists,
                "Boot environment '{}' already exists",
                options.be_name
            ));
        }

        let (source, suffix) = match &options.existing {
            None => {
                let source = self.activated().dataset.clone();
                let suffix = zectl_utils::snapshot_suffix_now();
                self.snapshot_source(&source, &suffix, options.recursive)?;
                (source, suffix)
            }
            Some(existing) => match existing.split_once('@') {
                Some((dataset, suffix)) => {
                    self.validate_existing_snapshot(dataset, suffix)?;
                    (dataset.to_string(), suffix.to_string())
                }
                None => {
                    if !self
                        .zfs()
                        .dataset_exists(existing, DatasetKind::Filesystem)?
                    {
                        return Err(err!(NotFound, "Dataset '{existing}' does not exist"));
                    }
                    let suffix = zectl_utils::snapshot_suffix_now();
                    self.snapshot_source(existing, &suffix, options.recursive)?;
                    (existing.clone(), suffix)
                }
            },
        };

        self.clone_tree(&source, &suffix, &new_be, options.recursive)?;
        if let Some(bootpool) = self.bootpool() {
            let mirror_source = bootpool.be_dataset(leaf_name(&source)?)?;
            let mirror_be = bootpool.be_dataset(&options.be_name)?;
            self.clone_tree(&mirror_source, &suffix, &mirror_be, options.recursive)?;
        }
        Ok(())
    }

    /// Snapshot a source BE (and its mirror) with a shared suffix.
    fn snapshot_source(&self, source: &str, suffix: &str, recursive: bool) -> Result<()> {
        self.zfs().snapshot(source, suffix, recursive)?;
        if let Some(bootpool) = self.bootpool() {
            let mirror = bootpool.be_dataset(leaf_name(source)?)?;
            if !self.zfs().dataset_exists(&mirror, DatasetKind::Filesystem)? {
                return Err(err!(
                    NotFound,
                    "Boot pool dataset '{mirror}' does not exist for source '{source}'"
                ));
            }
            self.zfs().snapshot(&mirror, suffix, recursive)?;
        }
        Ok(())
    }

    /// Validate a caller-named `dataset@suffix` source, on the main
    /// pool and on the mirror when configured.
    fn validate_existing_snapshot(&self, dataset: &str, suffix: &str) -> Result<()> {
        if !self.zfs().dataset_exists(dataset, DatasetKind::Filesystem)? {
            return Err(err!(NotFound, "Dataset '{dataset}' does not exist"));
        }
        let snapshot = format!("{dataset}@{suffix}");
        if !self
            .zfs()
            .dataset_exists(&snapshot, DatasetKind::Snapshot)?
        {
            return Err(err!(NotFound, "Snapshot '{snapshot}' does not exist"));
        }
        if let Some(bootpool) = self.bootpool() {
            let mirror = bootpool.be_dataset(leaf_name(dataset)?)?;
            let mirror_snapshot = format!("{mirror}@{suffix}");
            if !self
                .zfs()
                .dataset_exists(&mirror_snapshot, DatasetKind::Snapshot)?
            {
                return Err(err!(
                    NotFound,
                    "Boot pool snapshot '{mirror_snapshot}' does not exist"
                ));
            }
        }
        Ok(())
    }

    /// Clone `source_root@suffix` to `target_root`, walking the source
    /// tree when `recursive`. Every clone carries the source dataset's
    /// local and received properties, with `canmount=noauto` forced.
    /// Clones already created when a later tree node fails are left in
    /// place.
    pub(crate) fn clone_tree(
        &self,
        source_root: &str,
        suffix: &str,
        target_root: &str,
        recursive: bool,
    ) -> Result<()> {
        let datasets = if recursive {
            store::dataset_tree(self.zfs(), source_root)?
        } else {
            vec![source_root.to_string()]
        };
        for dataset in &datasets {
            let snapshot = format!("{dataset}@{suffix}");
            if !self
                .zfs()
                .dataset_exists(&snapshot, DatasetKind::Snapshot)?
            {
                return Err(err!(OpenFailed, "Snapshot '{snapshot}' does not exist"));
            }

            let mut properties: Vec<(String, String)> = self
                .zfs()
                .clone_properties(dataset)?
                .into_iter()
                .filter(|(name, _)| name != "canmount")
                .collect();
            properties.push(("canmount".to_string(), "noauto".to_string()));

            let relative = dataset.strip_prefix(source_root).unwrap_or_default();
            let target = format!("{target_root}{relative}");
            store::check_name_len(&target)?;
            tracing::debug!("cloning {snapshot} -> {target}");
            self.zfs()
                .clone_snapshot(&snapshot, &target, &properties)
                .map_err(|e| {
                    err!(Unknown, "Failed to clone '{snapshot}' to '{target}': {e}")
                })?;
        }
        Ok(())
    }
}
