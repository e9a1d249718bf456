//! Destroying boot environments and snapshots.
//!
//! The running and activated boot environments are untouchable; the
//! guards run before any mutation. A full BE is destroyed depth-first,
//! children before parents, with each dataset's own snapshots removed
//! ahead of it; remembered origin snapshots go last so clone ancestry
//! unwinds cleanly.

use crate::errors::{err, Error, Result};
use crate::handle::Handle;
use crate::store::DatasetKind;

/// Options for [`Handle::destroy`].
#[derive(Debug)]
pub struct DestroyOptions {
    /// Boot environment name, or `be@snapshot` to destroy one snapshot.
    pub be_name: String,
    /// Also destroy the origin snapshots of destroyed clones.
    pub destroy_origin: bool,
    /// Unmount mounted datasets instead of failing.
    pub force: bool,
}

impl DestroyOptions {
    pub fn new(be_name: impl Into<String>) -> Self {
        Self {
            be_name: be_name.into(),
            destroy_origin: true,
            force: false,
        }
    }
}

impl Handle {
    /// Destroy a boot environment, or a single snapshot of one.
    pub fn destroy(&self, options: &DestroyOptions) -> Result<()> {
        if let Some((be_name, suffix)) = options.be_name.split_once('@') {
            return self.destroy_be_snapshot(be_name, suffix);
        }

        let target = self.be_dataset(&options.be_name)?;
        if self.is_running(&target) {
            return Err(err!(
                Unknown,
                "Cannot destroy the running boot environment '{}'",
                options.be_name
            ));
        }
        if self.is_activated(&target) {
            return Err(err!(
                Unknown,
                "Cannot destroy the activated boot environment '{}'",
                options.be_name
            ));
        }
        if !self.zfs().dataset_exists(&target, DatasetKind::Filesystem)? {
            return Err(err!(
                NotFound,
                "Boot environment '{}' does not exist",
                options.be_name
            ));
        }

        self.destroy_recurse(&target, options)?;

        if let Some(bootpool) = self.bootpool() {
            let mirror = bootpool.be_dataset(&options.be_name)?;
            if self.zfs().dataset_exists(&mirror, DatasetKind::Filesystem)? {
                self.destroy_recurse(&mirror, options)?;
            } else {
                // Boot environments created before the mirror was
                // configured have no mirrored dataset.
                tracing::debug!("no mirror dataset '{mirror}', skipping");
            }
        }

        if let Some(plugin) = self.plugin() {
            plugin
                .post_destroy(self, &options.be_name)
                .map_err(|e| Error::plugin("post_destroy", e))?;
        }
        Ok(())
    }

    /// Destroy one snapshot of a boot environment. The leaf before `@`
    /// must be a real dataset under the BE root.
    fn destroy_be_snapshot(&self, be_name: &str, suffix: &str) -> Result<()> {
        let dataset = self.be_dataset(be_name)?;
        if !self.zfs().dataset_exists(&dataset, DatasetKind::Filesystem)? {
            return Err(err!(
                NotFound,
                "Boot environment '{be_name}' does not exist"
            ));
        }
        let snapshot = format!("{dataset}@{suffix}");
        if !self
            .zfs()
            .dataset_exists(&snapshot, DatasetKind::Snapshot)?
        {
            return Err(err!(NotFound, "Snapshot '{snapshot}' does not exist"));
        }
        self.zfs().destroy(&snapshot)
    }

    fn destroy_recurse(&self, dataset: &str, options: &DestroyOptions) -> Result<()> {
        // Origin snapshots recurse here too; they have no children or
        // mounts of their own.
        if dataset.contains('@') {
            return self.zfs().destroy(dataset);
        }

        if let Some(mountpoint) = self.zfs().mountpoint_of(dataset)? {
            if !options.force {
                return Err(err!(
                    MountFailed,
                    "Dataset '{dataset}' is mounted at '{mountpoint}'; use force to unmount"
                ));
            }
            self.zfs().unmount(dataset, true).map_err(|e| {
                err!(MountFailed, "Failed to unmount '{dataset}': {e}")
            })?;
        }

        let origin = if options.destroy_origin {
            self.zfs().origin(dataset)?
        } else {
            None
        };

        for child in self.zfs().children(dataset)? {
            self.destroy_recurse(&child, options)?;
        }
        for snapshot in self.zfs().snapshots(dataset)? {
            self.zfs().destroy(&snapshot)?;
        }
        tracing::debug!("destroying {dataset}");
        self.zfs().destroy(dataset)?;

        if let Some(origin) = origin {
            self.destroy_recurse(&origin, options)?;
        }
        Ok(())
    }
}
