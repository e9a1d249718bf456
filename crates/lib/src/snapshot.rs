//! Snapshotting a boot environment.

use crate::errors::{err, Result};
use crate::handle::Handle;
use crate::store::DatasetKind;

impl Handle {
    /// Take a recursive snapshot of `be_name` with a timestamp suffix,
    /// mirrored onto the boot pool when one is configured. Returns the
    /// full snapshot name.
    pub fn snapshot(&self, be_name: &str) -> Result<String> {
        let dataset = self.be_dataset(be_name)?;
        if !self.zfs().dataset_exists(&dataset, DatasetKind::Filesystem)? {
            return Err(err!(
                NotFound,
                "Boot environment '{be_name}' does not exist"
            ));
        }

        let suffix = zectl_utils::snapshot_suffix_now();
        self.zfs().snapshot(&dataset, &suffix, true)?;

        if let Some(bootpool) = self.bootpool() {
            let mirror = bootpool.be_dataset(be_name)?;
            if !self.zfs().dataset_exists(&mirror, DatasetKind::Filesystem)? {
                return Err(err!(
                    NotFound,
                    "Boot pool dataset '{mirror}' does not exist"
                ));
            }
            self.zfs().snapshot(&mirror, &suffix, true)?;
        }
        Ok(format!("{dataset}@{suffix}"))
    }
}
