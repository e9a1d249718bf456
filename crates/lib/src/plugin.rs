//! Bootloader plugin dispatch.
//!
//! A handle carries at most one bootloader integration, selected by
//! the `org.zectl:bootloader` property. Implementations are compiled
//! in and looked up by name; an unrecognized name is a
//! distinguishable `NotFound` the caller may treat as "continue
//! without bootloader integration". The five callbacks are invoked at
//! fixed points of Activate and Destroy.

use std::fmt;

use camino::Utf8PathBuf;

use crate::errors::{err, Result};
use crate::handle::Handle;
use crate::plugins;
use crate::props::{parse_qualified_name, PROP_NAMESPACE};

/// Property selecting the bootloader plugin.
pub const PROP_BOOTLOADER: &str = "bootloader";

/// Context handed to `mid_activate`: the boot environment being
/// activated and where it is currently mounted.
#[derive(Debug)]
pub struct ActivateData {
    pub be_name: String,
    pub be_mountpoint: Utf8PathBuf,
}

/// The bootloader integration contract.
///
/// `init` runs once at selection time, before the plugin is attached
/// to the handle (and may merge plugin defaults into the property
/// set); the remaining callbacks run at defined points of Activate and
/// Destroy. Callback failures are wrapped as `PluginError` by the
/// engine.
pub trait Bootloader: fmt::Debug {
    fn name(&self) -> &'static str;
    fn init(&self, handle: &mut Handle) -> Result<()>;
    fn pre_activate(&self, handle: &Handle) -> Result<()>;
    fn mid_activate(&self, handle: &Handle, data: &ActivateData) -> Result<()>;
    fn post_activate(&self, handle: &Handle, be_name: &str) -> Result<()>;
    fn post_destroy(&self, handle: &Handle, be_name: &str) -> Result<()>;
}

/// The property namespace owned by a plugin, e.g. `org.zectl.grub`.
pub fn plugin_namespace(plugin_name: &str) -> Result<String> {
    // Reuse the name parser so the length limit is enforced in one place.
    let (namespace, _) = parse_qualified_name(&format!("{plugin_name}:"))?;
    Ok(namespace)
}

fn load(name: &str) -> Result<Box<dyn Bootloader>> {
    match name {
        plugins::systemdboot::NAME => Ok(Box::new(plugins::systemdboot::SystemdBoot)),
        plugins::grub::NAME => Ok(Box::new(plugins::grub::Grub)),
        _ => Err(err!(NotFound, "No bootloader plugin named '{name}'")),
    }
}

impl Handle {
    /// Select and initialize the bootloader plugin named by the
    /// `bootloader` property. An empty property is success with no
    /// plugin loaded. A `NotFound` error is recoverable: the caller
    /// may continue without bootloader integration. Any other failure
    /// is fatal to the invocation.
    pub fn bootloader_set(&mut self) -> Result<()> {
        let name = self.prop(PROP_BOOTLOADER, PROP_NAMESPACE).to_string();
        if name.is_empty() {
            tracing::debug!("no bootloader configured");
            return Ok(());
        }
        let plugin = load(&name)?;
        plugin
            .init(self)
            .map_err(|e| crate::errors::Error::plugin("init", e))?;
        tracing::debug!("loaded bootloader plugin '{name}'");
        self.set_plugin(plugin);
        Ok(())
    }
}
