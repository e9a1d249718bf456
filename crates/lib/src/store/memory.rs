//! A deterministic in-memory dataset store.
//!
//! Models enough of the real store for the engine to be exercised
//! end-to-end in tests: clone/origin bookkeeping, promotion moving the
//! origin snapshot to the promoted clone, rename carrying descendants,
//! and destroy refusing datasets that still have children, snapshots
//! or dependent clones.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::errors::{err, Result};
use crate::props::{Property, PropertySource};
use crate::store::{DatasetKind, Zfs};

#[derive(Debug, Clone, Default)]
struct Dataset {
    props: BTreeMap<String, Property>,
    origin: Option<String>,
    mounted_at: Option<Utf8PathBuf>,
    creation: u64,
}

#[derive(Debug, Default)]
struct State {
    pools: BTreeMap<String, String>,
    datasets: BTreeMap<String, Dataset>,
    snapshots: BTreeMap<String, ()>,
    next_creation: u64,
}

/// In-memory [`Zfs`] implementation for tests.
///
/// Cloning shares the underlying state, so a test can keep a handle on
/// the store it passed into the engine and assert on it afterwards.
#[derive(Debug, Clone, Default)]
pub struct MemoryZfs {
    state: Rc<RefCell<State>>,
}

impl MemoryZfs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool with its initial `bootfs` value.
    pub fn add_pool(&self, name: &str, bootfs: &str) {
        self.state
            .borrow_mut()
            .pools
            .insert(name.to_string(), bootfs.to_string());
    }

    /// Create a filesystem dataset. The parent is not required to
    /// exist, so fixtures can be built in any order.
    pub fn add_filesystem(&self, path: &str) {
        let mut state = self.state.borrow_mut();
        state.next_creation += 1;
        let creation = state.next_creation;
        state.datasets.insert(
            path.to_string(),
            Dataset {
                creation,
                ..Default::default()
            },
        );
    }

    /// Create a snapshot entry directly (for "create from existing"
    /// fixtures).
    pub fn add_snapshot(&self, name: &str) {
        self.state.borrow_mut().snapshots.insert(name.to_string(), ());
    }

    /// All filesystem dataset names, sorted.
    pub fn dataset_names(&self) -> Vec<String> {
        self.state.borrow().datasets.keys().cloned().collect()
    }

    /// All snapshot names, sorted.
    pub fn snapshot_names(&self) -> Vec<String> {
        self.state.borrow().snapshots.keys().cloned().collect()
    }

    fn with_dataset<T>(&self, name: &str, f: impl FnOnce(&Dataset) -> T) -> Result<T> {
        let state = self.state.borrow();
        let ds = state
            .datasets
            .get(name)
            .ok_or_else(|| err!(LibraryError, "Dataset '{name}' does not exist"))?;
        Ok(f(ds))
    }
}

impl Zfs for MemoryZfs {
    fn pool_exists(&self, pool: &str) -> Result<bool> {
        Ok(self.state.borrow().pools.contains_key(pool))
    }

    fn pool_bootfs(&self, pool: &str) -> Result<String> {
        self.state
            .borrow()
            .pools
            .get(pool)
            .cloned()
            .ok_or_else(|| err!(LibraryError, "Pool '{pool}' does not exist"))
    }

    fn set_pool_bootfs(&self, pool: &str, dataset: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.datasets.contains_key(dataset) {
            return Err(err!(LibraryError, "Dataset '{dataset}' does not exist"));
        }
        let slot = state
            .pools
            .get_mut(pool)
            .ok_or_else(|| err!(LibraryError, "Pool '{pool}' does not exist"))?;
        *slot = dataset.to_string();
        Ok(())
    }

    fn dataset_exists(&self, name: &str, kind: DatasetKind) -> Result<bool> {
        let state = self.state.borrow();
        Ok(match kind {
            DatasetKind::Filesystem => state.datasets.contains_key(name),
            DatasetKind::Snapshot => state.snapshots.contains_key(name),
        })
    }

    fn get_property(&self, dataset: &str, property: &str) -> Result<String> {
        self.with_dataset(dataset, |ds| match property {
            "creation" => ds.creation.to_string(),
            "origin" => ds.origin.clone().unwrap_or_else(|| "-".to_string()),
            _ => ds
                .props
                .get(property)
                .map(|p| p.value.clone())
                .unwrap_or_else(|| match property {
                    "canmount" => "on".to_string(),
                    "mountpoint" => "none".to_string(),
                    _ => String::new(),
                }),
        })
    }

    fn set_property(&self, dataset: &str, property: &str, value: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let ds = state
            .datasets
            .get_mut(dataset)
            .ok_or_else(|| err!(LibraryError, "Dataset '{dataset}' does not exist"))?;
        ds.props
            .insert(property.to_string(), Property::local(value));
        Ok(())
    }

    fn user_properties(&self, dataset: &str) -> Result<BTreeMap<String, Property>> {
        self.with_dataset(dataset, |ds| {
            ds.props
                .iter()
                .filter(|(name, _)| name.contains(':'))
                .map(|(name, prop)| (name.clone(), prop.clone()))
                .collect()
        })
    }

    fn clone_properties(&self, dataset: &str) -> Result<Vec<(String, String)>> {
        self.with_dataset(dataset, |ds| {
            ds.props
                .iter()
                .filter(|(_, p)| {
                    matches!(p.source, PropertySource::Local | PropertySource::Received)
                })
                .map(|(name, p)| (name.clone(), p.value.clone()))
                .collect()
        })
    }

    fn origin(&self, dataset: &str) -> Result<Option<String>> {
        self.with_dataset(dataset, |ds| ds.origin.clone())
    }

    fn children(&self, dataset: &str) -> Result<Vec<String>> {
        let state = self.state.borrow();
        if !state.datasets.contains_key(dataset) {
            return Err(err!(LibraryError, "Dataset '{dataset}' does not exist"));
        }
        let prefix = format!("{dataset}/");
        Ok(state
            .datasets
            .keys()
            .filter(|name| {
                name.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.contains('/'))
            })
            .cloned()
            .collect())
    }

    fn snapshots(&self, dataset: &str) -> Result<Vec<String>> {
        let state = self.state.borrow();
        let prefix = format!("{dataset}@");
        Ok(state
            .snapshots
            .keys()
            .filter(|name| name.starts_with(&prefix))
            .cloned()
            .collect())
    }

    fn snapshot(&self, dataset: &str, suffix: &str, recursive: bool) -> Result<()> {
        let targets = if recursive {
            crate::store::dataset_tree(self, dataset)?
        } else {
            if !self.dataset_exists(dataset, DatasetKind::Filesystem)? {
                return Err(err!(LibraryError, "Dataset '{dataset}' does not exist"));
            }
            vec![dataset.to_string()]
        };
        let mut state = self.state.borrow_mut();
        for target in targets {
            let name = format!("{target}@{suffix}");
            if state.snapshots.contains_key(&name) {
                return Err(err!(LibraryError, "Snapshot '{name}' already exists"));
            }
            state.snapshots.insert(name, ());
        }
        Ok(())
    }

    fn clone_snapshot(
        &self,
        snapshot: &str,
        target: &str,
        properties: &[(String, String)],
    ) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.snapshots.contains_key(snapshot) {
            return Err(err!(LibraryError, "Snapshot '{snapshot}' does not exist"));
        }
        if state.datasets.contains_key(target) {
            return Err(err!(LibraryError, "Dataset '{target}' already exists"));
        }
        state.next_creation += 1;
        let creation = state.next_creation;
        let props = properties
            .iter()
            .map(|(name, value)| (name.clone(), Property::local(value)))
            .collect();
        state.datasets.insert(
            target.to_string(),
            Dataset {
                props,
                origin: Some(snapshot.to_string()),
                mounted_at: None,
                creation,
            },
        );
        Ok(())
    }

    fn promote(&self, dataset: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let Some(origin) = state
            .datasets
            .get(dataset)
            .ok_or_else(|| err!(LibraryError, "Dataset '{dataset}' does not exist"))?
            .origin
            .clone()
        else {
            // Promoting a non-clone is a no-op, as in the real store.
            return Ok(());
        };
        let (origin_ds, origin_suffix) = origin
            .split_once('@')
            .ok_or_else(|| err!(LibraryError, "Malformed origin '{origin}'"))?;
        let origin_ds = origin_ds.to_string();
        let moved = format!("{dataset}@{origin_suffix}");

        // The origin snapshot moves to the promoted clone; every other
        // dependent of that snapshot (including the former origin
        // dataset) now hangs off the moved name.
        state.snapshots.remove(&origin);
        state.snapshots.insert(moved.clone(), ());
        for ds in state.datasets.values_mut() {
            if ds.origin.as_deref() == Some(origin.as_str()) {
                ds.origin = Some(moved.clone());
            }
        }
        if let Some(ds) = state.datasets.get_mut(dataset) {
            ds.origin = None;
        }
        if let Some(former) = state.datasets.get_mut(&origin_ds) {
            former.origin = Some(moved);
        }
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.datasets.contains_key(from) {
            return Err(err!(LibraryError, "Dataset '{from}' does not exist"));
        }
        if state.datasets.contains_key(to) {
            return Err(err!(LibraryError, "Dataset '{to}' already exists"));
        }
        let subtree_prefix = format!("{from}/");
        let renamed_key = |name: &str| -> Option<String> {
            if name == from {
                Some(to.to_string())
            } else {
                name.strip_prefix(&subtree_prefix)
                    .map(|rest| format!("{to}/{rest}"))
            }
        };

        let datasets = std::mem::take(&mut state.datasets);
        state.datasets = datasets
            .into_iter()
            .map(|(name, mut ds)| {
                if let Some(origin) = &ds.origin {
                    if let Some((origin_fs, suffix)) = origin.split_once('@') {
                        if let Some(new_fs) = renamed_key(origin_fs) {
                            ds.origin = Some(format!("{new_fs}@{suffix}"));
                        }
                    }
                }
                (renamed_key(&name).unwrap_or(name), ds)
            })
            .collect();

        let snapshots = std::mem::take(&mut state.snapshots);
        state.snapshots = snapshots
            .into_iter()
            .map(|(name, v)| {
                let renamed = name
                    .split_once('@')
                    .and_then(|(fs, suffix)| renamed_key(fs).map(|f| format!("{f}@{suffix}")));
                (renamed.unwrap_or(name), v)
            })
            .collect();
        Ok(())
    }

    fn destroy(&self, name: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if name.contains('@') {
            if !state.snapshots.contains_key(name) {
                return Err(err!(LibraryError, "Snapshot '{name}' does not exist"));
            }
            if let Some((clone, _)) = state
                .datasets
                .iter()
                .find(|(_, ds)| ds.origin.as_deref() == Some(name))
            {
                return Err(err!(
                    LibraryError,
                    "Snapshot '{name}' has dependent clone '{clone}'"
                ));
            }
            state.snapshots.remove(name);
            return Ok(());
        }

        let ds = state
            .datasets
            .get(name)
            .ok_or_else(|| err!(LibraryError, "Dataset '{name}' does not exist"))?;
        if ds.mounted_at.is_some() {
            return Err(err!(LibraryError, "Dataset '{name}' is busy (mounted)"));
        }
        let child_prefix = format!("{name}/");
        if state.datasets.keys().any(|k| k.starts_with(&child_prefix)) {
            return Err(err!(LibraryError, "Dataset '{name}' has children"));
        }
        let snap_prefix = format!("{name}@");
        if state.snapshots.keys().any(|k| k.starts_with(&snap_prefix)) {
            return Err(err!(LibraryError, "Dataset '{name}' has snapshots"));
        }
        state.datasets.remove(name);
        Ok(())
    }

    fn mount_at(&self, dataset: &str, mountpoint: &Utf8Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let ds = state
            .datasets
            .get_mut(dataset)
            .ok_or_else(|| err!(LibraryError, "Dataset '{dataset}' does not exist"))?;
        if let Some(existing) = &ds.mounted_at {
            return Err(err!(
                LibraryError,
                "Dataset '{dataset}' is already mounted at '{existing}'"
            ));
        }
        ds.mounted_at = Some(mountpoint.to_owned());
        Ok(())
    }

    fn unmount(&self, dataset: &str, _force: bool) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let ds = state
            .datasets
            .get_mut(dataset)
            .ok_or_else(|| err!(LibraryError, "Dataset '{dataset}' does not exist"))?;
        if ds.mounted_at.is_none() {
            return Err(err!(LibraryError, "Dataset '{dataset}' is not mounted"));
        }
        ds.mounted_at = None;
        Ok(())
    }

    fn mountpoint_of(&self, dataset: &str) -> Result<Option<Utf8PathBuf>> {
        self.with_dataset(dataset, |ds| ds.mounted_at.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> MemoryZfs {
        let zfs = MemoryZfs::new();
        zfs.add_pool("zroot", "zroot/ROOT/default");
        zfs.add_filesystem("zroot");
        zfs.add_filesystem("zroot/ROOT");
        zfs.add_filesystem("zroot/ROOT/default");
        zfs
    }

    #[test]
    fn test_clone_and_promote_moves_origin() -> Result<()> {
        let zfs = fixture();
        zfs.snapshot("zroot/ROOT/default", "snap", false)?;
        zfs.clone_snapshot("zroot/ROOT/default@snap", "zroot/ROOT/new", &[])?;
        assert_eq!(
            zfs.origin("zroot/ROOT/new")?.as_deref(),
            Some("zroot/ROOT/default@snap")
        );

        zfs.promote("zroot/ROOT/new")?;
        assert_eq!(zfs.origin("zroot/ROOT/new")?, None);
        assert_eq!(
            zfs.origin("zroot/ROOT/default")?.as_deref(),
            Some("zroot/ROOT/new@snap")
        );
        assert!(zfs.dataset_exists("zroot/ROOT/new@snap", DatasetKind::Snapshot)?);
        assert!(!zfs.dataset_exists("zroot/ROOT/default@snap", DatasetKind::Snapshot)?);
        Ok(())
    }

    #[test]
    fn test_destroy_refuses_dependents() -> Result<()> {
        let zfs = fixture();
        zfs.snapshot("zroot/ROOT/default", "snap", false)?;
        zfs.clone_snapshot("zroot/ROOT/default@snap", "zroot/ROOT/new", &[])?;
        assert!(zfs.destroy("zroot/ROOT/default@snap").is_err());
        assert!(zfs.destroy("zroot/ROOT/default").is_err());
        zfs.destroy("zroot/ROOT/new")?;
        zfs.destroy("zroot/ROOT/default@snap")?;
        Ok(())
    }

    #[test]
    fn test_rename_carries_descendants() -> Result<()> {
        let zfs = fixture();
        zfs.add_filesystem("zroot/ROOT/default/usr");
        zfs.snapshot("zroot/ROOT/default", "s1", true)?;
        zfs.rename("zroot/ROOT/default", "zroot/ROOT/stable")?;
        assert!(zfs.dataset_exists("zroot/ROOT/stable/usr", DatasetKind::Filesystem)?);
        assert!(zfs.dataset_exists("zroot/ROOT/stable@s1", DatasetKind::Snapshot)?);
        assert!(!zfs.dataset_exists("zroot/ROOT/default", DatasetKind::Filesystem)?);
        Ok(())
    }
}
