//! The real dataset store, driven via the `zfs`/`zpool` binaries.
//!
//! Every trait method is one external invocation; a non-zero exit of a
//! primitive surfaces as `LibraryError` carrying the command's stderr.

use std::collections::BTreeMap;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use zectl_utils::CommandRunExt;

use crate::errors::{Error, ErrorKind, Result};
use crate::mounts::ProcMounts;
use crate::props::{Property, PropertySource};
use crate::store::{DatasetKind, Zfs};

/// [`Zfs`] implementation shelling out to the system tools.
#[derive(Debug, Default)]
pub struct SystemZfs {
    mounts: ProcMounts,
}

impl SystemZfs {
    pub fn new() -> Self {
        Self::default()
    }
}

fn library_err(e: anyhow::Error) -> Error {
    Error::new(ErrorKind::LibraryError, format!("{e:#}"))
}

fn zfs_cmd(args: &[&str]) -> Command {
    let mut cmd = Command::new("zfs");
    cmd.args(args);
    cmd.log_debug();
    cmd
}

fn zpool_cmd(args: &[&str]) -> Command {
    let mut cmd = Command::new("zpool");
    cmd.args(args);
    cmd.log_debug();
    cmd
}

impl Zfs for SystemZfs {
    fn pool_exists(&self, pool: &str) -> Result<bool> {
        let output = zpool_cmd(&["list", "-H", "-o", "name", pool])
            .run_get_output()
            .map_err(library_err)?;
        Ok(output.status.success())
    }

    fn pool_bootfs(&self, pool: &str) -> Result<String> {
        let out = zpool_cmd(&["get", "-H", "-o", "value", "bootfs", pool])
            .run_get_string()
            .map_err(library_err)?;
        let value = out.trim();
        // An unset bootfs reads back as "-".
        Ok(if value == "-" {
            String::new()
        } else {
            value.to_string()
        })
    }

    fn set_pool_bootfs(&self, pool: &str, dataset: &str) -> Result<()> {
        zpool_cmd(&["set", &format!("bootfs={dataset}"), pool])
            .run_capture_stderr()
            .map_err(library_err)
    }

    fn dataset_exists(&self, name: &str, kind: DatasetKind) -> Result<bool> {
        let kind = match kind {
            DatasetKind::Filesystem => "filesystem",
            DatasetKind::Snapshot => "snapshot",
        };
        let output = zfs_cmd(&["list", "-H", "-t", kind, "-o", "name", name])
            .run_get_output()
            .map_err(library_err)?;
        Ok(output.status.success())
    }

    fn get_property(&self, dataset: &str, property: &str) -> Result<String> {
        let out = zfs_cmd(&["get", "-H", "-p", "-o", "value", property, dataset])
            .run_get_string()
            .map_err(library_err)?;
        Ok(out.trim().to_string())
    }

    fn set_property(&self, dataset: &str, property: &str, value: &str) -> Result<()> {
        zfs_cmd(&["set", &format!("{property}={value}"), dataset])
            .run_capture_stderr()
            .map_err(library_err)
    }

    fn user_properties(&self, dataset: &str) -> Result<BTreeMap<String, Property>> {
        let out = zfs_cmd(&["get", "-H", "-p", "-o", "property,value,source", "all", dataset])
            .run_get_string()
            .map_err(library_err)?;
        let mut props = BTreeMap::new();
        for line in out.lines() {
            let mut fields = line.split('\t');
            let (Some(name), Some(value), Some(source)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            if !name.contains(':') {
                continue;
            }
            let source = match source {
                "local" => PropertySource::Local,
                "received" => PropertySource::Received,
                _ => continue,
            };
            props.insert(
                name.to_string(),
                Property {
                    value: value.to_string(),
                    source,
                },
            );
        }
        Ok(props)
    }

    fn clone_properties(&self, dataset: &str) -> Result<Vec<(String, String)>> {
        let out = zfs_cmd(&["get", "-H", "-p", "-o", "property,value,source", "all", dataset])
            .run_get_string()
            .map_err(library_err)?;
        let mut props = Vec::new();
        for line in out.lines() {
            let mut fields = line.split('\t');
            let (Some(name), Some(value), Some(source)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            // Read-only and inherited values report other sources and
            // are skipped; only explicit settings travel to the clone.
            if !matches!(source, "local" | "received") {
                continue;
            }
            props.push((name.to_string(), value.to_string()));
        }
        Ok(props)
    }

    fn origin(&self, dataset: &str) -> Result<Option<String>> {
        let origin = self.get_property(dataset, "origin")?;
        Ok((origin != "-" && !origin.is_empty()).then_some(origin))
    }

    fn children(&self, dataset: &str) -> Result<Vec<String>> {
        let out = zfs_cmd(&["list", "-H", "-d", "1", "-t", "filesystem", "-o", "name", dataset])
            .run_get_string()
            .map_err(library_err)?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty() && *name != dataset)
            .map(String::from)
            .collect())
    }

    fn snapshots(&self, dataset: &str) -> Result<Vec<String>> {
        let out = zfs_cmd(&["list", "-H", "-d", "1", "-t", "snapshot", "-o", "name", dataset])
            .run_get_string()
            .map_err(library_err)?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect())
    }

    fn snapshot(&self, dataset: &str, suffix: &str, recursive: bool) -> Result<()> {
        let name = format!("{dataset}@{suffix}");
        let mut args = vec!["snapshot"];
        if recursive {
            args.push("-r");
        }
        args.push(&name);
        zfs_cmd(&args).run_capture_stderr().map_err(library_err)
    }

    fn clone_snapshot(
        &self,
        snapshot: &str,
        target: &str,
        properties: &[(String, String)],
    ) -> Result<()> {
        let mut args: Vec<String> = vec!["clone".into()];
        for (name, value) in properties {
            args.push("-o".into());
            args.push(format!("{name}={value}"));
        }
        args.push(snapshot.into());
        args.push(target.into());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        zfs_cmd(&args).run_capture_stderr().map_err(library_err)
    }

    fn promote(&self, dataset: &str) -> Result<()> {
        zfs_cmd(&["promote", dataset])
            .run_capture_stderr()
            .map_err(library_err)
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        zfs_cmd(&["rename", from, to])
            .run_capture_stderr()
            .map_err(library_err)
    }

    fn destroy(&self, name: &str) -> Result<()> {
        zfs_cmd(&["destroy", name])
            .run_capture_stderr()
            .map_err(library_err)
    }

    fn mount_at(&self, dataset: &str, mountpoint: &Utf8Path) -> Result<()> {
        let mut cmd = Command::new("mount");
        cmd.args(["-t", "zfs", "-o", "zfsutil", dataset, mountpoint.as_str()]);
        cmd.log_debug();
        cmd.run_capture_stderr().map_err(library_err)
    }

    fn unmount(&self, dataset: &str, force: bool) -> Result<()> {
        let mut args = vec!["unmount"];
        if force {
            args.push("-f");
        }
        args.push(dataset);
        zfs_cmd(&args).run_capture_stderr().map_err(library_err)
    }

    fn mountpoint_of(&self, dataset: &str) -> Result<Option<Utf8PathBuf>> {
        self.mounts.path_for_dataset(dataset)
    }
}
