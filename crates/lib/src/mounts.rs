//! Mount table lookups.
//!
//! Resolving which dataset backs a mountpoint goes through the
//! [`MountTableResolver`] trait so the engine can be driven in tests
//! without a real mount table; [`ProcMounts`] is the `/proc/mounts`
//! implementation.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};

use crate::errors::{err, Result};

/// Resolves mountpoints to backing datasets.
pub trait MountTableResolver: fmt::Debug {
    /// The dataset mounted at exactly `path`.
    ///
    /// Fails with `OpenFailed` when the mount table cannot be read,
    /// `NotFound` when no entry matches, and `InvalidConfig` when the
    /// entry is not a ZFS mount.
    fn dataset_for_path(&self, path: &Utf8Path) -> Result<String>;
}

/// `/proc/mounts`-backed resolver.
#[derive(Debug)]
pub struct ProcMounts {
    table: Utf8PathBuf,
}

impl Default for ProcMounts {
    fn default() -> Self {
        Self {
            table: Utf8PathBuf::from("/proc/mounts"),
        }
    }
}

impl ProcMounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mountpoint of `dataset`, if it appears in the table.
    pub fn path_for_dataset(&self, dataset: &str) -> Result<Option<Utf8PathBuf>> {
        let contents = self.read_table()?;
        Ok(path_for_dataset(&contents, dataset))
    }

    fn read_table(&self) -> Result<String> {
        std::fs::read_to_string(&self.table)
            .map_err(|e| err!(OpenFailed, "Failed to read {}: {e}", self.table))
    }
}

impl MountTableResolver for ProcMounts {
    fn dataset_for_path(&self, path: &Utf8Path) -> Result<String> {
        let contents = self.read_table()?;
        dataset_for_path(&contents, path.as_str())
    }
}

/// Fixed mapping from mountpoints to datasets, for tests.
#[derive(Debug, Default)]
pub struct StaticMounts {
    entries: Vec<(Utf8PathBuf, String)>,
}

impl StaticMounts {
    /// A table with `/` backed by `dataset`.
    pub fn with_root(dataset: &str) -> Self {
        let mut table = Self::default();
        table.insert("/", dataset);
        table
    }

    pub fn insert(&mut self, path: impl Into<Utf8PathBuf>, dataset: impl Into<String>) {
        self.entries.push((path.into(), dataset.into()));
    }
}

impl MountTableResolver for StaticMounts {
    fn dataset_for_path(&self, path: &Utf8Path) -> Result<String> {
        self.entries
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, dataset)| dataset.clone())
            .ok_or_else(|| err!(NotFound, "No mount entry for '{path}'"))
    }
}

/// Decode the octal escapes mount tables use for whitespace in paths.
fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let code: String = chars.by_ref().take(3).collect();
        match u8::from_str_radix(&code, 8) {
            Ok(v) => out.push(v as char),
            Err(_) => {
                out.push(c);
                out.push_str(&code);
            }
        }
    }
    out
}

fn dataset_for_path(contents: &str, path: &str) -> Result<String> {
    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let (Some(fsname), Some(dir), Some(fstype)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if unescape(dir) != path {
            continue;
        }
        if fstype != "zfs" {
            return Err(err!(
                InvalidConfig,
                "'{path}' is backed by {fstype}, not by a ZFS dataset"
            ));
        }
        return Ok(unescape(fsname));
    }
    Err(err!(NotFound, "No mount entry for '{path}'"))
}

fn path_for_dataset(contents: &str, dataset: &str) -> Option<Utf8PathBuf> {
    contents.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let (Some(fsname), Some(dir), Some(fstype)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return None;
        };
        (fstype == "zfs" && unescape(fsname) == dataset)
            .then(|| Utf8PathBuf::from(unescape(dir)))
    })
}
