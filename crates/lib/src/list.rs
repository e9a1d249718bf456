//! Listing boot environments.
//!
//! Boot environments are not persisted as their own records; each row
//! is derived on demand from the datasets under the BE root.

use camino::Utf8PathBuf;

use crate::errors::{err, Result};
use crate::handle::{leaf_name, Handle};

/// One boot environment, derived from its dataset.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BootEnvironment {
    pub name: String,
    pub dataset: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<Utf8PathBuf>,
    /// Creation time, seconds since the epoch.
    pub creation: i64,
    /// Backs the currently mounted root filesystem.
    pub running: bool,
    /// Recorded as the next-boot target.
    pub activated: bool,
}

impl Handle {
    /// All boot environments under the BE root.
    pub fn list(&self) -> Result<Vec<BootEnvironment>> {
        let mut environments = Vec::new();
        for dataset in self.zfs().children(self.be_root())? {
            let creation_raw = self.zfs().get_property(&dataset, "creation")?;
            let creation = creation_raw.parse::<i64>().map_err(|_| {
                err!(
                    Unknown,
                    "Unparseable creation time '{creation_raw}' for '{dataset}'"
                )
            })?;
            environments.push(BootEnvironment {
                name: leaf_name(&dataset)?.to_string(),
                mountpoint: self.zfs().mountpoint_of(&dataset)?,
                creation,
                running: self.is_running(&dataset),
                activated: self.is_activated(&dataset),
                dataset,
            });
        }
        Ok(environments)
    }
}
