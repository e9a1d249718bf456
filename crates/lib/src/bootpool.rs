//! Separate boot pool support.
//!
//! Systems that keep `/boot` on storage the firmware can read use a
//! second pool holding one mirrored dataset per boot environment.
//! When the `org.zectl:bootpoolroot` property is set, every lifecycle
//! operation that mutates a BE dataset also mutates its mirror.

use crate::errors::{err, Result};
use crate::handle::Handle;
use crate::props::PROP_NAMESPACE;
use crate::store::{self, DatasetKind};

/// Property naming the mirror root dataset (e.g. `bpool/BOOT`).
pub const PROP_BOOTPOOL_ROOT: &str = "bootpoolroot";
/// Property naming an optional dataset-name prefix (e.g. `ze` for
/// `bpool/BOOT/ze-<env>`).
pub const PROP_BOOTPOOL_PREFIX: &str = "bootpoolprefix";

/// Resolved boot pool mirror state.
///
/// Present on a handle iff `bootpoolroot` is non-empty; all fields are
/// then non-empty and refer to verified datasets.
#[derive(Debug, Clone)]
pub struct BootPool {
    pool: String,
    root: String,
    root_prefixed: String,
    running_dataset: String,
    activated_dataset: String,
}

impl BootPool {
    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn running_dataset(&self) -> &str {
        &self.running_dataset
    }

    pub fn activated_dataset(&self) -> &str {
        &self.activated_dataset
    }

    /// The mirrored dataset path for a boot environment name.
    pub fn be_dataset(&self, be_name: &str) -> Result<String> {
        let dataset = format!("{}{be_name}", self.root_prefixed);
        store::check_name_len(&dataset)?;
        Ok(dataset)
    }
}

impl Handle {
    /// Resolve the boot pool mirror from the loaded properties.
    ///
    /// A separate, explicit step after [`Handle::init`]: reads
    /// `bootpoolroot`/`bootpoolprefix`; an empty root marks the mirror
    /// absent. Otherwise the mirror root and the mirrored running and
    /// activated datasets must exist and be mountable.
    pub fn boot_pool_set(&mut self) -> Result<()> {
        let root = self.prop(PROP_BOOTPOOL_ROOT, PROP_NAMESPACE).to_string();
        if root.is_empty() {
            self.set_bootpool(None);
            return Ok(());
        }
        let prefix = self.prop(PROP_BOOTPOOL_PREFIX, PROP_NAMESPACE).to_string();

        let pool = store::pool_of(&root).unwrap_or(&root).to_string();
        if !self.zfs().pool_exists(&pool)? {
            return Err(err!(OpenFailed, "Failed to open boot pool '{pool}'"));
        }
        self.mountable_mirror_dataset(&root)?;

        let root_prefixed = if prefix.is_empty() {
            format!("{root}/")
        } else {
            format!("{root}/{prefix}-")
        };

        let activated_dataset = format!("{root_prefixed}{}", self.activated().name);
        store::check_name_len(&activated_dataset)?;
        self.mountable_mirror_dataset(&activated_dataset)?;

        // The running BE usually is the activated one; only resolve a
        // distinct mirror dataset when it is not.
        let running_dataset = if self.running().dataset == self.activated().dataset {
            activated_dataset.clone()
        } else {
            let dataset = format!("{root_prefixed}{}", self.running().name);
            store::check_name_len(&dataset)?;
            self.mountable_mirror_dataset(&dataset)?;
            dataset
        };

        tracing::debug!("boot pool mirror: {root_prefixed}* on pool {pool}");
        self.set_bootpool(Some(BootPool {
            pool,
            root,
            root_prefixed,
            running_dataset,
            activated_dataset,
        }));
        Ok(())
    }

    fn mountable_mirror_dataset(&self, dataset: &str) -> Result<()> {
        if !self.zfs().dataset_exists(dataset, DatasetKind::Filesystem)? {
            return Err(err!(
                NotFound,
                "Boot pool dataset '{dataset}' does not exist"
            ));
        }
        if self.zfs().get_property(dataset, "mountpoint")? == "none" {
            return Err(err!(
                InvalidConfig,
                "Boot pool dataset '{dataset}' is not mountable (mountpoint=none)"
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::mounts::StaticMounts;
    use crate::store::{MemoryZfs, Zfs};

    fn system_with_bootpool() -> MemoryZfs {
        let zfs = MemoryZfs::new();
        zfs.add_pool("zroot", "zroot/ROOT/default");
        zfs.add_filesystem("zroot");
        zfs.add_filesystem("zroot/ROOT");
        zfs.add_filesystem("zroot/ROOT/default");
        zfs.add_pool("bpool", "");
        zfs.add_filesystem("bpool");
        zfs.add_filesystem("bpool/BOOT");
        zfs.add_filesystem("bpool/BOOT/ze-default");
        for ds in ["bpool/BOOT", "bpool/BOOT/ze-default"] {
            zfs.set_property(ds, "mountpoint", "legacy").unwrap();
        }
        zfs.set_property("zroot/ROOT", "org.zectl:bootpoolroot", "bpool/BOOT")
            .unwrap();
        zfs.set_property("zroot/ROOT", "org.zectl:bootpoolprefix", "ze")
            .unwrap();
        zfs
    }

    fn handle(zfs: MemoryZfs) -> Handle {
        Handle::init(Box::new(zfs), &StaticMounts::with_root("zroot/ROOT/default")).unwrap()
    }

    #[test]
    fn test_boot_pool_set_resolves_mirror() -> Result<()> {
        let mut handle = handle(system_with_bootpool());
        handle.boot_pool_set()?;
        let bootpool = handle.bootpool().expect("mirror configured");
        assert_eq!(bootpool.pool(), "bpool");
        assert_eq!(bootpool.activated_dataset(), "bpool/BOOT/ze-default");
        assert_eq!(bootpool.running_dataset(), "bpool/BOOT/ze-default");
        assert_eq!(bootpool.be_dataset("upgrade")?, "bpool/BOOT/ze-upgrade");
        Ok(())
    }

    #[test]
    fn test_boot_pool_absent_without_property() -> Result<()> {
        let zfs = MemoryZfs::new();
        zfs.add_pool("zroot", "zroot/ROOT/default");
        zfs.add_filesystem("zroot");
        zfs.add_filesystem("zroot/ROOT");
        zfs.add_filesystem("zroot/ROOT/default");
        let mut handle = handle(zfs);
        handle.boot_pool_set()?;
        assert!(handle.bootpool().is_none());
        Ok(())
    }

    #[test]
    fn test_boot_pool_missing_mirror_dataset() {
        let zfs = system_with_bootpool();
        zfs.set_property("zroot/ROOT", "org.zectl:bootpoolprefix", "other")
            .unwrap();
        let mut handle = handle(zfs);
        let e = handle.boot_pool_set().unwrap_err();
        assert_eq!(e.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_boot_pool_unmountable_mirror() {
        let zfs = system_with_bootpool();
        zfs.set_property("bpool/BOOT/ze-default", "mountpoint", "none")
            .unwrap();
        let mut handle = handle(zfs);
        let e = handle.boot_pool_set().unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidConfig);
    }
}
