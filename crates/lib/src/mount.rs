//! Mounting a boot environment for offline inspection.
//!
//! The target's own dataset is mounted at the chosen (or generated)
//! root; descendant datasets follow underneath it according to their
//! `mountpoint` property. A mirrored boot dataset mounts at
//! `<root>/boot` when its mountpoint is `legacy`.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::errors::{err, Result};
use crate::handle::Handle;
use crate::store::{self, DatasetKind};

impl Handle {
    /// Mount boot environment `be_name`, returning the mountpoint. A
    /// unique temporary directory is created when none is given.
    pub fn mount(&self, be_name: &str, mountpoint: Option<&Utf8Path>) -> Result<Utf8PathBuf> {
        let dataset = self.be_dataset(be_name)?;
        if !self.zfs().dataset_exists(&dataset, DatasetKind::Filesystem)? {
            return Err(err!(
                NotFound,
                "Boot environment '{be_name}' does not exist"
            ));
        }
        if self.is_running(&dataset) {
            return Err(err!(
                Unknown,
                "Boot environment '{be_name}' is the running boot environment"
            ));
        }
        if let Some(existing) = self.zfs().mountpoint_of(&dataset)? {
            return Err(err!(
                MountFailed,
                "Boot environment '{be_name}' is already mounted at '{existing}'"
            ));
        }

        let root = match mountpoint {
            Some(path) => path.to_owned(),
            None => {
                let dir = tempfile::Builder::new()
                    .prefix("zectl-mount.")
                    .tempdir()
                    .map_err(|e| {
                        err!(MkdirFailed, "Failed to create temporary mountpoint: {e}")
                    })?;
                // The mount outlives this call; keep the directory.
                #[allow(deprecated)]
                let kept = dir.into_path();
                Utf8PathBuf::from_path_buf(kept).map_err(|p| {
                    err!(
                        NameTooLong,
                        "Temporary mountpoint '{}' is not valid UTF-8",
                        p.display()
                    )
                })?
            }
        };

        self.zfs()
            .mount_at(&dataset, &root)
            .map_err(|e| err!(MountFailed, "Failed to mount '{dataset}': {e}"))?;
        self.mount_children(&dataset, &root)?;

        if let Some(bootpool) = self.bootpool() {
            let mirror = bootpool.be_dataset(be_name)?;
            let mountpoint_prop = self.zfs().get_property(&mirror, "mountpoint")?;
            if mountpoint_prop != "legacy" {
                return Err(err!(
                    NotImplemented,
                    "Boot pool dataset '{mirror}' has mountpoint '{mountpoint_prop}'; \
                     only 'legacy' is supported"
                ));
            }
            let boot_dir = root.join("boot");
            fs::create_dir_all(&boot_dir)
                .map_err(|e| err!(MkdirFailed, "Failed to create '{boot_dir}': {e}"))?;
            self.zfs()
                .mount_at(&mirror, &boot_dir)
                .map_err(|e| err!(MountFailed, "Failed to mount '{mirror}': {e}"))?;
        }
        Ok(root)
    }

    /// Mount the descendants of `dataset` under `root`. Children with
    /// `mountpoint=none` or `legacy` are never mounted directly but
    /// their own children are still visited.
    fn mount_children(&self, dataset: &str, root: &Utf8Path) -> Result<()> {
        for child in self.zfs().children(dataset)? {
            let mountpoint_prop = self.zfs().get_property(&child, "mountpoint")?;
            if mountpoint_prop == "none" || mountpoint_prop == "legacy" {
                self.mount_children(&child, root)?;
                continue;
            }
            let target = root.join(mountpoint_prop.trim_start_matches('/'));
            if !target.as_std_path().exists() {
                fs::create_dir_all(&target)
                    .map_err(|e| err!(MkdirFailed, "Failed to create '{target}': {e}"))?;
            }
            if let Some(existing) = self.zfs().mountpoint_of(&child)? {
                return Err(err!(
                    MountFailed,
                    "Dataset '{child}' is already mounted at '{existing}'"
                ));
            }
            self.zfs()
                .mount_at(&child, &target)
                .map_err(|e| err!(MountFailed, "Failed to mount '{child}': {e}"))?;
            self.mount_children(&child, root)?;
        }
        Ok(())
    }

    /// Unmount boot environment `be_name`, children before parents,
    /// skipping datasets that are already unmounted.
    pub fn unmount(&self, be_name: &str) -> Result<()> {
        let dataset = self.be_dataset(be_name)?;
        if !self.zfs().dataset_exists(&dataset, DatasetKind::Filesystem)? {
            return Err(err!(
                NotFound,
                "Boot environment '{be_name}' does not exist"
            ));
        }
        if self.is_running(&dataset) {
            return Err(err!(
                Unknown,
                "Cannot unmount the running boot environment '{be_name}'"
            ));
        }

        if let Some(bootpool) = self.bootpool() {
            // Best effort; a stuck mirror mount must not block the BE.
            let mirror = bootpool.be_dataset(be_name)?;
            if let Ok(Some(_)) = self.zfs().mountpoint_of(&mirror) {
                if let Err(e) = self.zfs().unmount(&mirror, false) {
                    tracing::debug!("ignoring mirror unmount failure for {mirror}: {e}");
                }
            }
        }

        for child in store::dataset_tree(self.zfs(), &dataset)?.iter().rev() {
            if self.zfs().mountpoint_of(child)?.is_none() {
                continue;
            }
            self.zfs()
                .unmount(child, false)
                .map_err(|e| err!(MountFailed, "Failed to unmount '{child}': {e}"))?;
        }
        Ok(())
    }
}
