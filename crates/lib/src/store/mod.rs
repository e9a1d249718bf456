//! Dataset store abstraction.
//!
//! The lifecycle engine talks to the copy-on-write dataset store
//! through the [`Zfs`] trait: one method per store primitive, each a
//! synchronous, blocking call. The real backend ([`SystemZfs`]) shells
//! out to the `zfs`/`zpool` binaries; [`MemoryZfs`] is a deterministic
//! in-memory model used by tests.

use std::collections::BTreeMap;
use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};

use crate::errors::{err, Result};
use crate::props::{Property, MAX_NAME_LEN};

mod memory;
mod system;
pub use memory::MemoryZfs;
pub use system::SystemZfs;

/// Kind of dataset for existence checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    Filesystem,
    Snapshot,
}

/// Capability interface over the dataset store.
///
/// All methods take `&self`; implementations requiring mutation use
/// interior mutability. Each call maps to a single store primitive and
/// is atomic only at that granularity.
pub trait Zfs: fmt::Debug {
    /// Whether the named pool can be opened.
    fn pool_exists(&self, pool: &str) -> Result<bool>;

    /// Read the pool-level next-boot dataset property.
    fn pool_bootfs(&self, pool: &str) -> Result<String>;

    /// Set the pool-level next-boot dataset property.
    fn set_pool_bootfs(&self, pool: &str, dataset: &str) -> Result<()>;

    /// Whether a dataset of the given kind exists at `name`.
    fn dataset_exists(&self, name: &str, kind: DatasetKind) -> Result<bool>;

    /// Read a single (native or user) property value.
    fn get_property(&self, dataset: &str, property: &str) -> Result<String>;

    /// Set a single property.
    fn set_property(&self, dataset: &str, property: &str, value: &str) -> Result<()>;

    /// All user properties of a dataset, with provenance. Inherited
    /// values are not included.
    fn user_properties(&self, dataset: &str) -> Result<BTreeMap<String, Property>>;

    /// The locally-set or received (not inherited, not read-only)
    /// properties of a dataset, as name/value pairs suitable for
    /// applying at clone time.
    fn clone_properties(&self, dataset: &str) -> Result<Vec<(String, String)>>;

    /// The origin snapshot if the dataset is a clone.
    fn origin(&self, dataset: &str) -> Result<Option<String>>;

    /// Direct filesystem children of a dataset.
    fn children(&self, dataset: &str) -> Result<Vec<String>>;

    /// Snapshots of a dataset (full `dataset@suffix` names).
    fn snapshots(&self, dataset: &str) -> Result<Vec<String>>;

    /// Take `dataset@suffix`, recursively over descendants if requested.
    fn snapshot(&self, dataset: &str, suffix: &str, recursive: bool) -> Result<()>;

    /// Clone `snapshot` to `target`, applying `properties` atomically
    /// at creation.
    fn clone_snapshot(
        &self,
        snapshot: &str,
        target: &str,
        properties: &[(String, String)],
    ) -> Result<()>;

    /// Promote a clone to be the origin of its own snapshot history.
    fn promote(&self, dataset: &str) -> Result<()>;

    /// Rename a dataset. Children move with it; no parent creation.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Destroy a single filesystem or snapshot. Fails if a filesystem
    /// still has children or snapshots, or a snapshot has dependent
    /// clones.
    fn destroy(&self, name: &str) -> Result<()>;

    /// Mount a dataset at an explicit mountpoint.
    fn mount_at(&self, dataset: &str, mountpoint: &Utf8Path) -> Result<()>;

    /// Unmount a mounted dataset.
    fn unmount(&self, dataset: &str, force: bool) -> Result<()>;

    /// Where the dataset is currently mounted, if anywhere.
    fn mountpoint_of(&self, dataset: &str) -> Result<Option<Utf8PathBuf>>;
}

/// Pre-order walk of the filesystem tree rooted at (and including)
/// `root`. Every parent precedes its children; iterating the reversed
/// list visits children before parents.
pub fn dataset_tree(zfs: &dyn Zfs, root: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_string()];
    while let Some(dataset) = stack.pop() {
        let mut children = zfs.children(&dataset)?;
        out.push(dataset);
        // Reverse so the stack pops them in listing order.
        children.reverse();
        stack.extend(children);
    }
    Ok(out)
}

/// The leaf (boot environment) name of a dataset path.
pub(crate) fn leaf(dataset: &str) -> Option<&str> {
    dataset.rsplit_once('/').map(|(_, leaf)| leaf)
}

/// Everything before the last `/`.
pub(crate) fn parent(dataset: &str) -> Option<&str> {
    dataset.rsplit_once('/').map(|(parent, _)| parent)
}

/// The pool portion of a dataset path (everything before the first `/`).
pub(crate) fn pool_of(dataset: &str) -> Option<&str> {
    dataset.split_once('/').map(|(pool, _)| pool)
}

/// Validate a composed dataset or snapshot name against the store's
/// name-length limit.
pub(crate) fn check_name_len(name: &str) -> Result<()> {
    if name.len() >= MAX_NAME_LEN {
        return Err(err!(
            NameTooLong,
            "Dataset name '{name}' exceeds max dataset name length"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_helpers() {
        assert_eq!(leaf("zroot/ROOT/default"), Some("default"));
        assert_eq!(parent("zroot/ROOT/default"), Some("zroot/ROOT"));
        assert_eq!(pool_of("zroot/ROOT/default"), Some("zroot"));
        assert_eq!(parent("zroot"), None);
        assert_eq!(pool_of("zroot"), None);
    }

    #[test]
    fn test_dataset_tree_order() -> Result<()> {
        let zfs = MemoryZfs::new();
        zfs.add_pool("zroot", "zroot/ROOT/default");
        zfs.add_filesystem("zroot");
        zfs.add_filesystem("zroot/ROOT");
        zfs.add_filesystem("zroot/ROOT/default");
        zfs.add_filesystem("zroot/ROOT/default/usr");
        zfs.add_filesystem("zroot/ROOT/default/usr/local");
        zfs.add_filesystem("zroot/ROOT/default/var");

        let tree = dataset_tree(&zfs, "zroot/ROOT/default")?;
        assert_eq!(
            tree,
            vec![
                "zroot/ROOT/default",
                "zroot/ROOT/default/usr",
                "zroot/ROOT/default/usr/local",
                "zroot/ROOT/default/var",
            ]
        );
        Ok(())
    }
}
