//! Process-wide session state for boot environment operations.
//!
//! A [`Handle`] is built once at startup and holds the pool identity,
//! the BE root, the running and activated boot environments, the
//! loaded property set, the optional boot pool mirror and the selected
//! bootloader plugin. Construction is all-or-nothing; teardown is
//! `Drop`. Operations return errors instead of recording them on the
//! handle.

use camino::Utf8Path;

use crate::bootpool::BootPool;
use crate::errors::{err, Result};
use crate::mounts::{MountTableResolver, ProcMounts};
use crate::plugin::Bootloader;
use crate::props::{PropertySet, PROP_NAMESPACE};
use crate::store::{self, DatasetKind, SystemZfs, Zfs};

/// A boot environment identity: leaf name plus full dataset path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeId {
    pub name: String,
    pub dataset: String,
}

/// Session state shared by all lifecycle operations.
///
/// Not safe to share across concurrent operations; the design assumes
/// exactly one operation per process invocation, end to end.
#[derive(Debug)]
pub struct Handle {
    zfs: Box<dyn Zfs>,
    pool: String,
    be_root: String,
    running: BeId,
    activated: BeId,
    props: PropertySet,
    bootpool: Option<BootPool>,
    plugin: Option<Box<dyn Bootloader>>,
}

impl Handle {
    /// Build a handle for the running system.
    pub fn open_system() -> Result<Self> {
        Self::init(Box::new(SystemZfs::new()), &ProcMounts::new())
    }

    /// Resolve the running and activated boot environments and load
    /// the property set. Any failure tears down the partial state and
    /// returns it; a returned handle satisfies all invariants.
    pub fn init(zfs: Box<dyn Zfs>, mounts: &dyn MountTableResolver) -> Result<Self> {
        let running_dataset = mounts.dataset_for_path(Utf8Path::new("/")).map_err(|e| {
            err!(
                InvalidConfig,
                "System not configured for boot environments: {e}"
            )
        })?;
        let be_root = store::parent(&running_dataset)
            .ok_or_else(|| {
                err!(
                    InvalidConfig,
                    "Root dataset '{running_dataset}' has no parent to act as BE root"
                )
            })?
            .to_string();
        let pool = store::pool_of(&be_root)
            .ok_or_else(|| {
                err!(
                    InvalidConfig,
                    "BE root '{be_root}' is a pool root; boot environments need a dedicated parent dataset"
                )
            })?
            .to_string();
        if !zfs.pool_exists(&pool)? {
            return Err(err!(OpenFailed, "Failed to open pool '{pool}'"));
        }

        let activated_dataset = zfs.pool_bootfs(&pool)?;
        if activated_dataset.is_empty() {
            return Err(err!(
                InvalidConfig,
                "Pool '{pool}' has no bootfs set; cannot determine the activated boot environment"
            ));
        }
        let activated = BeId {
            name: leaf_name(&activated_dataset)?.to_string(),
            dataset: activated_dataset,
        };
        let running = BeId {
            name: leaf_name(&running_dataset)?.to_string(),
            dataset: running_dataset,
        };

        let all_props = zfs.user_properties(&be_root)?;
        let props = PropertySet::filter_by_namespace(&all_props, PROP_NAMESPACE);
        tracing::debug!(
            "initialized: pool={pool} root={be_root} running={} activated={} ({} properties)",
            running.dataset,
            activated.dataset,
            props.len()
        );

        Ok(Self {
            zfs,
            pool,
            be_root,
            running,
            activated,
            props,
            bootpool: None,
            plugin: None,
        })
    }

    /// Verify the running and activated boot environment datasets
    /// exist in the store.
    pub fn validate_system(&self) -> Result<()> {
        for be in [&self.running, &self.activated] {
            if !self.zfs.dataset_exists(&be.dataset, DatasetKind::Filesystem)? {
                return Err(err!(
                    Unknown,
                    "Boot environment dataset '{}' does not exist",
                    be.dataset
                ));
            }
        }
        Ok(())
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn be_root(&self) -> &str {
        &self.be_root
    }

    pub fn running(&self) -> &BeId {
        &self.running
    }

    pub fn activated(&self) -> &BeId {
        &self.activated
    }

    pub fn bootpool(&self) -> Option<&BootPool> {
        self.bootpool.as_ref()
    }

    pub(crate) fn set_bootpool(&mut self, bootpool: Option<BootPool>) {
        self.bootpool = bootpool;
    }

    pub(crate) fn zfs(&self) -> &dyn Zfs {
        self.zfs.as_ref()
    }

    pub(crate) fn plugin(&self) -> Option<&dyn Bootloader> {
        self.plugin.as_deref()
    }

    pub(crate) fn set_plugin(&mut self, plugin: Box<dyn Bootloader>) {
        self.plugin = Some(plugin);
    }

    /// The dataset path a boot environment name maps to, validated
    /// against the store's name-length limit.
    pub fn be_dataset(&self, be_name: &str) -> Result<String> {
        let dataset = format!("{}/{be_name}", self.be_root);
        store::check_name_len(&dataset)?;
        Ok(dataset)
    }

    pub fn is_running(&self, dataset: &str) -> bool {
        self.running.dataset == dataset
    }

    pub fn is_activated(&self, dataset: &str) -> bool {
        self.activated.dataset == dataset
    }

    /// Look up `namespace:name` in the loaded property set; empty
    /// string when unset.
    pub fn prop(&self, name: &str, namespace: &str) -> &str {
        self.props.get(name, namespace)
    }

    pub fn properties(&self) -> &PropertySet {
        &self.props
    }

    /// Merge caller-supplied defaults into the loaded property set;
    /// explicit settings always win.
    pub fn merge_default_properties(&mut self, defaults: &PropertySet, namespace: &str) {
        self.props.merge_defaults(defaults, namespace);
    }

    /// Parse and persist `prefix:name=value` settings on the BE root
    /// dataset, then record them in the loaded set.
    pub fn set_properties(&mut self, inputs: &[String]) -> Result<()> {
        let mut parsed = PropertySet::new();
        for input in inputs {
            parsed.add_set_property(input)?;
        }
        for (qualified, prop) in parsed.iter() {
            self.zfs.set_property(&self.be_root, qualified, &prop.value)?;
            self.props.insert_local(qualified, prop.value.clone());
        }
        Ok(())
    }
}

pub(crate) fn leaf_name(dataset: &str) -> Result<&str> {
    store::leaf(dataset)
        .ok_or_else(|| err!(Unknown, "Dataset '{dataset}' has no boot environment name"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::mounts::StaticMounts;
    use crate::store::MemoryZfs;

    fn system() -> MemoryZfs {
        let zfs = MemoryZfs::new();
        zfs.add_pool("zroot", "zroot/ROOT/default");
        zfs.add_filesystem("zroot");
        zfs.add_filesystem("zroot/ROOT");
        zfs.add_filesystem("zroot/ROOT/default");
        zfs
    }

    #[test]
    fn test_init_resolves_identities() -> Result<()> {
        let zfs = system();
        zfs.set_property("zroot/ROOT", "org.zectl:bootloader", "grub")?;
        let handle = Handle::init(Box::new(zfs), &StaticMounts::with_root("zroot/ROOT/default"))?;
        assert_eq!(handle.pool(), "zroot");
        assert_eq!(handle.be_root(), "zroot/ROOT");
        assert_eq!(handle.running().name, "default");
        assert_eq!(handle.activated().dataset, "zroot/ROOT/default");
        assert_eq!(handle.prop("bootloader", PROP_NAMESPACE), "grub");
        handle.validate_system()?;
        Ok(())
    }

    #[test]
    fn test_init_requires_mount_entry() {
        let zfs = system();
        let e = Handle::init(Box::new(zfs), &StaticMounts::default()).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_init_requires_bootfs() {
        let zfs = MemoryZfs::new();
        zfs.add_pool("zroot", "");
        zfs.add_filesystem("zroot");
        zfs.add_filesystem("zroot/ROOT");
        zfs.add_filesystem("zroot/ROOT/default");
        let e = Handle::init(
            Box::new(zfs),
            &StaticMounts::with_root("zroot/ROOT/default"),
        )
        .unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_init_rejects_shallow_root() {
        let zfs = MemoryZfs::new();
        zfs.add_pool("zroot", "zroot/default");
        zfs.add_filesystem("zroot");
        zfs.add_filesystem("zroot/default");
        let e = Handle::init(Box::new(zfs), &StaticMounts::with_root("zroot/default"))
            .unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_set_properties_persists() -> Result<()> {
        let zfs = system();
        let mut handle =
            Handle::init(Box::new(zfs), &StaticMounts::with_root("zroot/ROOT/default"))?;
        handle.set_properties(&["bootloader=systemdboot".to_string()])?;
        assert_eq!(handle.prop("bootloader", PROP_NAMESPACE), "systemdboot");
        assert_eq!(
            handle
                .zfs()
                .get_property("zroot/ROOT", "org.zectl:bootloader")?,
            "systemdboot"
        );
        Ok(())
    }
}
