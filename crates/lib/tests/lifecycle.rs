//! End-to-end lifecycle tests against the in-memory dataset store.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use zectl_lib::mounts::StaticMounts;
use zectl_lib::props::{Property, PROP_NAMESPACE};
use zectl_lib::store::{DatasetKind, MemoryZfs, Zfs};
use zectl_lib::{CreateOptions, DestroyOptions, ErrorKind, Handle, Result};

const ROOT_BE: &str = "zroot/ROOT/default";

fn base_system() -> MemoryZfs {
    let zfs = MemoryZfs::new();
    zfs.add_pool("zroot", ROOT_BE);
    zfs.add_filesystem("zroot");
    zfs.add_filesystem("zroot/ROOT");
    zfs.add_filesystem(ROOT_BE);
    zfs.set_property(ROOT_BE, "mountpoint", "/").unwrap();
    zfs.set_property(ROOT_BE, "canmount", "noauto").unwrap();
    zfs
}

fn mirrored_system() -> MemoryZfs {
    let zfs = base_system();
    zfs.add_pool("bpool", "");
    zfs.add_filesystem("bpool");
    zfs.add_filesystem("bpool/BOOT");
    zfs.add_filesystem("bpool/BOOT/ze-default");
    for dataset in ["bpool/BOOT", "bpool/BOOT/ze-default"] {
        zfs.set_property(dataset, "mountpoint", "legacy").unwrap();
    }
    zfs.set_property("zroot/ROOT", "org.zectl:bootpoolroot", "bpool/BOOT")
        .unwrap();
    zfs.set_property("zroot/ROOT", "org.zectl:bootpoolprefix", "ze")
        .unwrap();
    zfs
}

fn open(zfs: &MemoryZfs) -> Handle {
    let mut handle =
        Handle::init(Box::new(zfs.clone()), &StaticMounts::with_root(ROOT_BE)).unwrap();
    handle.boot_pool_set().unwrap();
    handle.validate_system().unwrap();
    handle
}

fn single_snapshot_of(zfs: &MemoryZfs, dataset: &str) -> String {
    let snapshots = zfs.snapshots(dataset).unwrap();
    assert_eq!(snapshots.len(), 1, "expected one snapshot of {dataset}");
    snapshots.into_iter().next().unwrap()
}

#[test]
fn test_create_activate_destroy_scenario() -> Result<()> {
    let zfs = base_system();
    let handle = open(&zfs);

    handle.create(&CreateOptions::new("upgrade"))?;

    // Created from a timestamped snapshot of the activated BE, with
    // canmount forced off on the clone.
    let snapshot = single_snapshot_of(&zfs, ROOT_BE);
    assert!(zfs.dataset_exists("zroot/ROOT/upgrade", DatasetKind::Filesystem)?);
    assert_eq!(
        zfs.origin("zroot/ROOT/upgrade")?.as_deref(),
        Some(snapshot.as_str())
    );
    assert_eq!(zfs.get_property("zroot/ROOT/upgrade", "canmount")?, "noauto");
    assert_eq!(zfs.get_property("zroot/ROOT/upgrade", "mountpoint")?, "/");

    handle.activate("upgrade")?;
    assert_eq!(zfs.pool_bootfs("zroot")?, "zroot/ROOT/upgrade");
    // The running BE is untouched, and promotion reparented it onto
    // the new BE's history.
    assert!(zfs.dataset_exists(ROOT_BE, DatasetKind::Filesystem)?);
    assert_eq!(zfs.origin("zroot/ROOT/upgrade")?, None);
    assert!(zfs
        .origin(ROOT_BE)?
        .is_some_and(|o| o.starts_with("zroot/ROOT/upgrade@")));

    // Still running, no longer activated: destroy must refuse.
    let e = handle
        .destroy(&DestroyOptions::new("default"))
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Unknown);
    assert!(zfs.dataset_exists(ROOT_BE, DatasetKind::Filesystem)?);
    Ok(())
}

#[test]
fn test_activate_missing_leaves_bootfs_alone() {
    let zfs = base_system();
    let handle = open(&zfs);
    let e = handle.activate("nope").unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Unknown);
    assert_eq!(zfs.pool_bootfs("zroot").unwrap(), ROOT_BE);
}

#[test]
fn test_destroy_guards_refuse_running_and_activated() {
    let zfs = base_system();
    let handle = open(&zfs);
    let before = (zfs.dataset_names(), zfs.snapshot_names());

    let e = handle
        .destroy(&DestroyOptions::new("default"))
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Unknown);
    assert_eq!(before, (zfs.dataset_names(), zfs.snapshot_names()));
}

#[test]
fn test_destroy_refuses_activated_but_not_running() -> Result<()> {
    let zfs = MemoryZfs::new();
    zfs.add_pool("zroot", "zroot/ROOT/next");
    zfs.add_filesystem("zroot");
    zfs.add_filesystem("zroot/ROOT");
    zfs.add_filesystem(ROOT_BE);
    zfs.add_filesystem("zroot/ROOT/next");
    let handle = Handle::init(Box::new(zfs.clone()), &StaticMounts::with_root(ROOT_BE))?;

    let e = handle.destroy(&DestroyOptions::new("next")).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Unknown);
    assert!(zfs.dataset_exists("zroot/ROOT/next", DatasetKind::Filesystem)?);
    Ok(())
}

#[test]
fn test_create_then_destroy_restores_tree() -> Result<()> {
    let zfs = base_system();
    zfs.add_filesystem("zroot/ROOT/default/usr");
    let handle = open(&zfs);
    let before = (zfs.dataset_names(), zfs.snapshot_names());

    handle.create(&CreateOptions {
        be_name: "upgrade".into(),
        existing: None,
        recursive: true,
    })?;
    assert!(zfs.dataset_exists("zroot/ROOT/upgrade/usr", DatasetKind::Filesystem)?);

    handle.destroy(&DestroyOptions::new("upgrade"))?;
    assert_eq!(before, (zfs.dataset_names(), zfs.snapshot_names()));
    Ok(())
}

#[test]
fn test_create_from_existing_snapshot_reuses_it() -> Result<()> {
    let zfs = base_system();
    let handle = open(&zfs);
    zfs.snapshot(ROOT_BE, "known", false)?;

    handle.create(&CreateOptions {
        be_name: "fromsnap".into(),
        existing: Some(format!("{ROOT_BE}@known")),
        recursive: false,
    })?;
    assert_eq!(
        zfs.origin("zroot/ROOT/fromsnap")?.as_deref(),
        Some("zroot/ROOT/default@known")
    );
    // No additional snapshot was generated.
    assert_eq!(zfs.snapshot_names(), vec![format!("{ROOT_BE}@known")]);
    Ok(())
}

#[test]
fn test_create_from_missing_source_fails() {
    let zfs = base_system();
    let handle = open(&zfs);
    for source in ["zroot/ROOT/ghost", "zroot/ROOT/default@ghost"] {
        let e = handle
            .create(&CreateOptions {
                be_name: "new".into(),
                existing: Some(source.into()),
                recursive: false,
            })
            .unwrap_err();
        assert_eq!(e.kind(), ErrorKind::NotFound, "source {source}");
    }
}

#[test]
fn test_create_existing_name_fails() {
    let zfs = base_system();
    let handle = open(&zfs);
    let e = handle.create(&CreateOptions::new("default")).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::AlreadyExists);
}

#[test]
fn test_mirrored_create_keeps_pools_in_lockstep() -> Result<()> {
    let zfs = mirrored_system();
    let handle = open(&zfs);

    handle.create(&CreateOptions::new("upgrade"))?;
    assert!(zfs.dataset_exists("zroot/ROOT/upgrade", DatasetKind::Filesystem)?);
    assert!(zfs.dataset_exists("bpool/BOOT/ze-upgrade", DatasetKind::Filesystem)?);

    // Same generated suffix on both pools.
    let main = single_snapshot_of(&zfs, ROOT_BE);
    let mirror = single_snapshot_of(&zfs, "bpool/BOOT/ze-default");
    assert_eq!(
        main.split_once('@').unwrap().1,
        mirror.split_once('@').unwrap().1
    );
    Ok(())
}

#[test]
fn test_mirrored_destroy_tolerates_missing_mirror() -> Result<()> {
    let zfs = mirrored_system();
    // A legacy BE from before mirroring was enabled.
    zfs.add_filesystem("zroot/ROOT/legacy");
    let handle = open(&zfs);

    handle.destroy(&DestroyOptions::new("legacy"))?;
    assert!(!zfs.dataset_exists("zroot/ROOT/legacy", DatasetKind::Filesystem)?);
    Ok(())
}

#[test]
fn test_snapshot_mirrors_suffix() -> Result<()> {
    let zfs = mirrored_system();
    zfs.add_filesystem("zroot/ROOT/upgrade");
    zfs.add_filesystem("bpool/BOOT/ze-upgrade");
    zfs.set_property("bpool/BOOT/ze-upgrade", "mountpoint", "legacy")?;
    let handle = open(&zfs);

    let snapshot = handle.snapshot("upgrade")?;
    let suffix = snapshot.split_once('@').unwrap().1.to_string();
    assert!(zfs.dataset_exists(&snapshot, DatasetKind::Snapshot)?);
    assert!(zfs.dataset_exists(
        &format!("bpool/BOOT/ze-upgrade@{suffix}"),
        DatasetKind::Snapshot
    )?);
    Ok(())
}

#[test]
fn test_destroy_snapshot_only() -> Result<()> {
    let zfs = base_system();
    zfs.add_filesystem("zroot/ROOT/old");
    let handle = open(&zfs);
    zfs.snapshot("zroot/ROOT/old", "keep", false)?;
    zfs.snapshot("zroot/ROOT/old", "drop", false)?;

    handle.destroy(&DestroyOptions::new("old@drop"))?;
    assert!(zfs.dataset_exists("zroot/ROOT/old", DatasetKind::Filesystem)?);
    assert!(zfs.dataset_exists("zroot/ROOT/old@keep", DatasetKind::Snapshot)?);
    assert!(!zfs.dataset_exists("zroot/ROOT/old@drop", DatasetKind::Snapshot)?);

    let e = handle
        .destroy(&DestroyOptions::new("ghost@drop"))
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::NotFound);
    Ok(())
}

#[test]
fn test_destroy_mounted_requires_force() -> Result<()> {
    let zfs = base_system();
    zfs.add_filesystem("zroot/ROOT/old");
    let handle = open(&zfs);
    zfs.mount_at("zroot/ROOT/old", Utf8Path::new("/mnt/old"))?;

    let e = handle.destroy(&DestroyOptions::new("old")).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::MountFailed);
    assert!(zfs.dataset_exists("zroot/ROOT/old", DatasetKind::Filesystem)?);

    let mut options = DestroyOptions::new("old");
    options.force = true;
    handle.destroy(&options)?;
    assert!(!zfs.dataset_exists("zroot/ROOT/old", DatasetKind::Filesystem)?);
    Ok(())
}

#[test]
fn test_rename() -> Result<()> {
    let zfs = base_system();
    zfs.add_filesystem("zroot/ROOT/upgrade");
    let handle = open(&zfs);

    handle.rename("upgrade", "stable")?;
    assert!(zfs.dataset_exists("zroot/ROOT/stable", DatasetKind::Filesystem)?);
    assert!(!zfs.dataset_exists("zroot/ROOT/upgrade", DatasetKind::Filesystem)?);

    let e = handle.rename("default", "other").unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Unknown);
    let e = handle.rename("ghost", "other").unwrap_err();
    assert_eq!(e.kind(), ErrorKind::NotFound);
    let e = handle.rename("stable", "default").unwrap_err();
    assert_eq!(e.kind(), ErrorKind::AlreadyExists);
    Ok(())
}

#[test]
fn test_mirrored_rename_requires_mirror_target_absent() -> Result<()> {
    let zfs = mirrored_system();
    zfs.add_filesystem("zroot/ROOT/upgrade");
    zfs.add_filesystem("bpool/BOOT/ze-upgrade");
    zfs.add_filesystem("bpool/BOOT/ze-stable");
    let handle = open(&zfs);

    let e = handle.rename("upgrade", "stable").unwrap_err();
    assert_eq!(e.kind(), ErrorKind::AlreadyExists);
    assert!(zfs.dataset_exists("zroot/ROOT/upgrade", DatasetKind::Filesystem)?);

    handle.rename("upgrade", "fresh")?;
    assert!(zfs.dataset_exists("zroot/ROOT/fresh", DatasetKind::Filesystem)?);
    assert!(zfs.dataset_exists("bpool/BOOT/ze-fresh", DatasetKind::Filesystem)?);
    Ok(())
}

/// Delegating store whose mirror-pool renames fail, to observe the
/// divergence left behind when the second rename step of a mirrored
/// rename cannot complete.
#[derive(Debug)]
struct MirrorRenameFails(MemoryZfs);

impl Zfs for MirrorRenameFails {
    fn pool_exists(&self, pool: &str) -> Result<bool> {
        self.0.pool_exists(pool)
    }
    fn pool_bootfs(&self, pool: &str) -> Result<String> {
        self.0.pool_bootfs(pool)
    }
    fn set_pool_bootfs(&self, pool: &str, dataset: &str) -> Result<()> {
        self.0.set_pool_bootfs(pool, dataset)
    }
    fn dataset_exists(&self, name: &str, kind: DatasetKind) -> Result<bool> {
        self.0.dataset_exists(name, kind)
    }
    fn get_property(&self, dataset: &str, property: &str) -> Result<String> {
        self.0.get_property(dataset, property)
    }
    fn set_property(&self, dataset: &str, property: &str, value: &str) -> Result<()> {
        self.0.set_property(dataset, property, value)
    }
    fn user_properties(&self, dataset: &str) -> Result<BTreeMap<String, Property>> {
        self.0.user_properties(dataset)
    }
    fn clone_properties(&self, dataset: &str) -> Result<Vec<(String, String)>> {
        self.0.clone_properties(dataset)
    }
    fn origin(&self, dataset: &str) -> Result<Option<String>> {
        self.0.origin(dataset)
    }
    fn children(&self, dataset: &str) -> Result<Vec<String>> {
        self.0.children(dataset)
    }
    fn snapshots(&self, dataset: &str) -> Result<Vec<String>> {
        self.0.snapshots(dataset)
    }
    fn snapshot(&self, dataset: &str, suffix: &str, recursive: bool) -> Result<()> {
        self.0.snapshot(dataset, suffix, recursive)
    }
    fn clone_snapshot(
        &self,
        snapshot: &str,
        target: &str,
        properties: &[(String, String)],
    ) -> Result<()> {
        self.0.clone_snapshot(snapshot, target, properties)
    }
    fn promote(&self, dataset: &str) -> Result<()> {
        self.0.promote(dataset)
    }
    fn rename(&self, from: &str, to: &str) -> Result<()> {
        if from.starts_with("bpool/") {
            return Err(zectl_lib::Error::new(
                ErrorKind::LibraryError,
                format!("injected failure renaming '{from}'"),
            ));
        }
        self.0.rename(from, to)
    }
    fn destroy(&self, name: &str) -> Result<()> {
        self.0.destroy(name)
    }
    fn mount_at(&self, dataset: &str, mountpoint: &Utf8Path) -> Result<()> {
        self.0.mount_at(dataset, mountpoint)
    }
    fn unmount(&self, dataset: &str, force: bool) -> Result<()> {
        self.0.unmount(dataset, force)
    }
    fn mountpoint_of(&self, dataset: &str) -> Result<Option<Utf8PathBuf>> {
        self.0.mountpoint_of(dataset)
    }
}

#[test]
fn test_mirrored_rename_divergence_is_reported() -> Result<()> {
    let zfs = mirrored_system();
    zfs.add_filesystem("zroot/ROOT/upgrade");
    zfs.add_filesystem("bpool/BOOT/ze-upgrade");
    let mut handle = Handle::init(
        Box::new(MirrorRenameFails(zfs.clone())),
        &StaticMounts::with_root(ROOT_BE),
    )?;
    handle.boot_pool_set()?;

    let e = handle.rename("upgrade", "stable").unwrap_err();
    assert_eq!(e.kind(), ErrorKind::LibraryError);
    assert!(e.to_string().contains("diverged"), "message: {e}");
    // The main rename is left in place; the mirror kept the old name.
    assert!(zfs.dataset_exists("zroot/ROOT/stable", DatasetKind::Filesystem)?);
    assert!(zfs.dataset_exists("bpool/BOOT/ze-upgrade", DatasetKind::Filesystem)?);
    assert!(!zfs.dataset_exists("bpool/BOOT/ze-stable", DatasetKind::Filesystem)?);
    Ok(())
}

#[test]
fn test_mount_and_unmount_tree() -> Result<()> {
    let zfs = base_system();
    zfs.add_filesystem("zroot/ROOT/upgrade");
    zfs.add_filesystem("zroot/ROOT/upgrade/var");
    zfs.add_filesystem("zroot/ROOT/upgrade/opt");
    zfs.add_filesystem("zroot/ROOT/upgrade/opt/tools");
    zfs.set_property("zroot/ROOT/upgrade/var", "mountpoint", "/var")?;
    zfs.set_property("zroot/ROOT/upgrade/opt", "mountpoint", "none")?;
    zfs.set_property("zroot/ROOT/upgrade/opt/tools", "mountpoint", "/opt/tools")?;
    let handle = open(&zfs);

    let tmp = tempfile::tempdir().unwrap();
    let root = Utf8Path::from_path(tmp.path()).unwrap();
    let mounted_at = handle.mount("upgrade", Some(root))?;
    assert_eq!(mounted_at, root);
    assert_eq!(
        zfs.mountpoint_of("zroot/ROOT/upgrade")?.as_deref(),
        Some(root)
    );
    assert_eq!(
        zfs.mountpoint_of("zroot/ROOT/upgrade/var")?,
        Some(root.join("var"))
    );
    // mountpoint=none is skipped, but its child still mounts.
    assert_eq!(zfs.mountpoint_of("zroot/ROOT/upgrade/opt")?, None);
    assert_eq!(
        zfs.mountpoint_of("zroot/ROOT/upgrade/opt/tools")?,
        Some(root.join("opt/tools"))
    );

    // Mounting again refuses.
    let e = handle.mount("upgrade", Some(root)).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::MountFailed);

    handle.unmount("upgrade")?;
    for dataset in [
        "zroot/ROOT/upgrade",
        "zroot/ROOT/upgrade/var",
        "zroot/ROOT/upgrade/opt/tools",
    ] {
        assert_eq!(zfs.mountpoint_of(dataset)?, None, "{dataset}");
    }
    Ok(())
}

#[test]
fn test_mount_refuses_running() {
    let zfs = base_system();
    let handle = open(&zfs);
    let e = handle.mount("default", None).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Unknown);
}

#[test]
fn test_mount_mirror_requires_legacy() -> Result<()> {
    let zfs = mirrored_system();
    zfs.add_filesystem("zroot/ROOT/upgrade");
    zfs.add_filesystem("bpool/BOOT/ze-upgrade");
    zfs.set_property("bpool/BOOT/ze-upgrade", "mountpoint", "/boot")?;
    let handle = open(&zfs);

    let tmp = tempfile::tempdir().unwrap();
    let root = Utf8Path::from_path(tmp.path()).unwrap();
    let e = handle.mount("upgrade", Some(root)).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::NotImplemented);

    zfs.set_property("bpool/BOOT/ze-upgrade", "mountpoint", "legacy")?;
    zfs.unmount("zroot/ROOT/upgrade", false)?;
    handle.mount("upgrade", Some(root))?;
    assert_eq!(
        zfs.mountpoint_of("bpool/BOOT/ze-upgrade")?,
        Some(root.join("boot"))
    );
    Ok(())
}

#[test]
fn test_systemdboot_post_destroy_cleans_esp() -> Result<()> {
    let esp = tempfile::tempdir().unwrap();
    let esp_path = Utf8Path::from_path(esp.path()).unwrap();
    std::fs::create_dir_all(esp_path.join("loader/entries")).unwrap();
    std::fs::create_dir_all(esp_path.join("env/org.zectl-old")).unwrap();
    std::fs::write(
        esp_path.join("loader/entries/org.zectl-old.conf"),
        "title old\n",
    )
    .unwrap();

    let zfs = base_system();
    zfs.add_filesystem("zroot/ROOT/old");
    zfs.set_property("zroot/ROOT", "org.zectl:bootloader", "systemdboot")?;
    zfs.set_property("zroot/ROOT", "org.zectl.systemdboot:efi", esp_path.as_str())?;
    let mut handle =
        Handle::init(Box::new(zfs.clone()), &StaticMounts::with_root(ROOT_BE))?;
    handle.bootloader_set()?;
    assert_eq!(handle.prop("efi", "org.zectl.systemdboot"), esp_path.as_str());

    handle.destroy(&DestroyOptions::new("old"))?;
    assert!(!esp_path.join("loader/entries/org.zectl-old.conf").exists());
    assert!(!esp_path.join("env/org.zectl-old").exists());
    Ok(())
}

#[test]
fn test_get_property_roundtrip_through_store() -> Result<()> {
    let zfs = base_system();
    let mut handle = Handle::init(Box::new(zfs.clone()), &StaticMounts::with_root(ROOT_BE))?;
    handle.set_properties(&["grub:boot=/boot".to_string()])?;

    // A fresh handle sees the persisted property.
    let reopened = Handle::init(Box::new(zfs), &StaticMounts::with_root(ROOT_BE))?;
    assert_eq!(reopened.prop("boot", "org.zectl.grub"), "/boot");
    assert_eq!(reopened.prop("bootloader", PROP_NAMESPACE), "");
    Ok(())
}

#[test]
fn test_list_flags_and_rows() -> Result<()> {
    let zfs = base_system();
    zfs.add_filesystem("zroot/ROOT/upgrade");
    let handle = open(&zfs);

    let environments = handle.list()?;
    assert_eq!(environments.len(), 2);
    let default = environments.iter().find(|b| b.name == "default").unwrap();
    assert!(default.running && default.activated);
    assert_eq!(default.dataset, ROOT_BE);
    let upgrade = environments.iter().find(|b| b.name == "upgrade").unwrap();
    assert!(!upgrade.running && !upgrade.activated);
    Ok(())
}
