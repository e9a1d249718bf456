//! Activating a boot environment as the next-boot target.
//!
//! A linear sequence with no retries: validate, plugin pre-activate,
//! plugin mid-activate against a scoped temporary mount, set the pool
//! bootfs, then flatten clone ancestry by promotion so the former
//! origin can later be destroyed independently.

use camino::{Utf8Path, Utf8PathBuf};

use crate::errors::{err, Error, Result};
use crate::handle::Handle;
use crate::plugin::ActivateData;
use crate::store::DatasetKind;

impl Handle {
    /// Make `be_name` the next-boot target.
    ///
    /// The pool-level bootfs is only changed once every earlier step
    /// has succeeded; a failure before that leaves the activation
    /// state untouched.
    pub fn activate(&self, be_name: &str) -> Result<()> {
        let target = self.be_dataset(be_name)?;
        if !self.zfs().dataset_exists(&target, DatasetKind::Filesystem)? {
            return Err(err!(
                Unknown,
                "Boot environment '{be_name}' does not exist"
            ));
        }

        if let Some(plugin) = self.plugin() {
            plugin
                .pre_activate(self)
                .map_err(|e| Error::plugin("pre_activate", e))?;
            self.mid_activate(plugin, be_name, &target)?;
        }

        self.zfs()
            .set_pool_bootfs(self.pool(), &target)
            .map_err(|e| {
                err!(
                    Unknown,
                    "Failed to set bootfs of pool '{}' to '{target}': {e}",
                    self.pool()
                )
            })?;

        self.promote_tree(&target)?;
        for child in self.zfs().children(&target)? {
            self.promote_tree(&child)?;
        }

        if let Some(plugin) = self.plugin() {
            plugin
                .post_activate(self, be_name)
                .map_err(|e| Error::plugin("post_activate", e))?;
        }
        Ok(())
    }

    /// Give the plugin a mounted view of the target to edit.
    ///
    /// The running BE is already mounted at `/`; any other target is
    /// mounted at a private temporary mountpoint which is always
    /// unmounted and released again, whether or not the hook
    /// succeeded, preserving the first error encountered.
    fn mid_activate(
        &self,
        plugin: &dyn crate::plugin::Bootloader,
        be_name: &str,
        target: &str,
    ) -> Result<()> {
        if self.is_running(target) {
            let data = ActivateData {
                be_name: be_name.to_string(),
                be_mountpoint: Utf8PathBuf::from("/"),
            };
            return plugin
                .mid_activate(self, &data)
                .map_err(|e| Error::plugin("mid_activate", e));
        }

        let tmpdir = tempfile::Builder::new()
            .prefix("zectl-activate.")
            .tempdir()
            .map_err(|e| err!(MkdirFailed, "Failed to create temporary mountpoint: {e}"))?;
        let mountpoint = Utf8Path::from_path(tmpdir.path())
            .ok_or_else(|| err!(NameTooLong, "Temporary mountpoint is not valid UTF-8"))?
            .to_owned();

        let result = self
            .zfs()
            .set_property(target, "mountpoint", mountpoint.as_str())
            .map_err(|e| err!(MountFailed, "Failed to set mountpoint on '{target}': {e}"))
            .and_then(|()| {
                self.zfs()
                    .mount_at(target, &mountpoint)
                    .map_err(|e| err!(MountFailed, "Failed to mount '{target}': {e}"))
            })
            .and_then(|()| {
                let data = ActivateData {
                    be_name: be_name.to_string(),
                    be_mountpoint: mountpoint.clone(),
                };
                plugin
                    .mid_activate(self, &data)
                    .map_err(|e| Error::plugin("mid_activate", e))
            });

        let cleanup = self.mid_activate_cleanup(target);
        result.and(cleanup)
    }

    fn mid_activate_cleanup(&self, target: &str) -> Result<()> {
        let mut first_err = None;
        let mut record = |r: Result<()>| {
            if let Err(e) = r {
                first_err.get_or_insert(e);
            }
        };
        if matches!(self.zfs().mountpoint_of(target), Ok(Some(_))) {
            record(self.zfs().unmount(target, false));
        }
        record(self.zfs().set_property(target, "canmount", "noauto"));
        record(self.zfs().set_property(target, "mountpoint", "/"));
        match first_err {
            None => Ok(()),
            Some(e) => Err(err!(
                Unknown,
                "Failed to release temporary mount of '{target}': {e}"
            )),
        }
    }

    /// Set `canmount=noauto` over the subtree and flatten any clone
    /// ancestry by promoting.
    fn promote_tree(&self, dataset: &str) -> Result<()> {
        self.zfs()
            .set_property(dataset, "canmount", "noauto")
            .map_err(|e| err!(Unknown, "Failed to set canmount on '{dataset}': {e}"))?;
        if self.zfs().origin(dataset)?.is_some() {
            tracing::debug!("promoting {dataset}");
            self.zfs()
                .promote(dataset)
                .map_err(|e| err!(Unknown, "Failed to promote '{dataset}': {e}"))?;
        }
        for child in self.zfs().children(dataset)? {
            self.promote_tree(&child)?;
        }
        Ok(())
    }
}
