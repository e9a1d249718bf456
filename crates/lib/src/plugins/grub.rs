//! GRUB integration.
//!
//! GRUB's boot menu is produced by its own config generator scanning
//! the BE datasets, so the lifecycle hooks have nothing to edit; the
//! plugin only seeds the property telling that generator where the
//! boot files live.

use crate::errors::Result;
use crate::handle::Handle;
use crate::plugin::{plugin_namespace, ActivateData, Bootloader};
use crate::props::PropertySet;

pub(crate) const NAME: &str = "grub";

#[derive(Debug)]
pub(crate) struct Grub;

impl Bootloader for Grub {
    fn name(&self) -> &'static str {
        NAME
    }

    fn init(&self, handle: &mut Handle) -> Result<()> {
        let namespace = plugin_namespace(NAME)?;
        let mut defaults = PropertySet::new();
        defaults.add_default("boot", "/boot", &namespace)?;
        handle.merge_default_properties(&defaults, &namespace);
        Ok(())
    }

    fn pre_activate(&self, _handle: &Handle) -> Result<()> {
        Ok(())
    }

    fn mid_activate(&self, _handle: &Handle, _data: &ActivateData) -> Result<()> {
        Ok(())
    }

    fn post_activate(&self, _handle: &Handle, _be_name: &str) -> Result<()> {
        Ok(())
    }

    fn post_destroy(&self, _handle: &Handle, _be_name: &str) -> Result<()> {
        Ok(())
    }
}
