//! Renaming boot environments.
//!
//! Rename never touches the running or activated BE and refuses
//! mounted datasets. With a mirror configured both hierarchies are
//! validated up front, then renamed main-pool first; a mirror failure
//! after the main rename leaves the hierarchies diverged and is
//! reported as such.

use crate::errors::{err, Result};
use crate::handle::Handle;
use crate::store::DatasetKind;

impl Handle {
    /// Rename boot environment `be_name` to `new_be_name`.
    pub fn rename(&self, be_name: &str, new_be_name: &str) -> Result<()> {
        let old = self.be_dataset(be_name)?;
        let new = self.be_dataset(new_be_name)?;

        if self.zfs().dataset_exists(&new, DatasetKind::Filesystem)? {
            return Err(err!(
                AlreadyExists,
                "Boot environment '{new_be_name}' already exists"
            ));
        }
        if !self.zfs().dataset_exists(&old, DatasetKind::Filesystem)? {
            return Err(err!(
                NotFound,
                "Boot environment '{be_name}' does not exist"
            ));
        }
        if self.is_running(&old) {
            return Err(err!(
                Unknown,
                "Cannot rename the running boot environment '{be_name}'"
            ));
        }
        if self.is_activated(&old) {
            return Err(err!(
                Unknown,
                "Cannot rename the activated boot environment '{be_name}'"
            ));
        }
        if let Some(mountpoint) = self.zfs().mountpoint_of(&old)? {
            return Err(err!(
                Unknown,
                "Boot environment '{be_name}' is mounted at '{mountpoint}'"
            ));
        }

        let mirror = match self.bootpool() {
            Some(bootpool) => {
                let mirror_old = bootpool.be_dataset(be_name)?;
                let mirror_new = bootpool.be_dataset(new_be_name)?;
                if !self
                    .zfs()
                    .dataset_exists(&mirror_old, DatasetKind::Filesystem)?
                {
                    return Err(err!(
                        NotFound,
                        "Boot pool dataset '{mirror_old}' does not exist"
                    ));
                }
                if self
                    .zfs()
                    .dataset_exists(&mirror_new, DatasetKind::Filesystem)?
                {
                    return Err(err!(
                        AlreadyExists,
                        "Boot pool dataset '{mirror_new}' already exists"
                    ));
                }
                if let Some(mountpoint) = self.zfs().mountpoint_of(&mirror_old)? {
                    return Err(err!(
                        Unknown,
                        "Boot pool dataset '{mirror_old}' is mounted at '{mountpoint}'"
                    ));
                }
                Some((mirror_old, mirror_new))
            }
            None => None,
        };

        self.zfs().rename(&old, &new)?;
        if let Some((mirror_old, mirror_new)) = mirror {
            // There is no rollback of the main rename; a failure here
            // leaves the hierarchies diverged and must say so.
            self.zfs().rename(&mirror_old, &mirror_new).map_err(|e| {
                err!(
                    LibraryError,
                    "Boot pool rename '{mirror_old}' -> '{mirror_new}' failed after \
                     '{old}' was renamed to '{new}'; hierarchies have diverged: {e}"
                )
            })?;
        }
        Ok(())
    }
}
