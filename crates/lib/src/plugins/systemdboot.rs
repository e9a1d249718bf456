//! systemd-boot integration.
//!
//! Each boot environment owns a loader entry
//! `<esp>/loader/entries/org.zectl-<be>.conf` and a kernel directory
//! `<esp>/env/org.zectl-<be>`. Activation points the boot environment's
//! fstab at its own ESP kernel path and makes its entry the loader
//! default; destroying a BE removes both again.

use std::fs;
use std::io::Write as _;

use anyhow::Context as _;
use camino::Utf8Path;
use fn_error_context::context;

use crate::errors::{err, Error, Result};
use crate::handle::Handle;
use crate::plugin::{plugin_namespace, ActivateData, Bootloader};
use crate::props::PropertySet;

pub(crate) const NAME: &str = "systemdboot";

/// Prefix for loader entries and per-BE kernel directories on the ESP.
const ENTRY_PREFIX: &str = "org.zectl";

#[derive(Debug)]
pub(crate) struct SystemdBoot;

impl SystemdBoot {
    fn required_prop(handle: &Handle, name: &str) -> Result<String> {
        let namespace = plugin_namespace(NAME)?;
        let value = handle.prop(name, &namespace);
        if value.is_empty() {
            return Err(err!(
                InvalidConfig,
                "Property '{namespace}:{name}' is not set"
            ));
        }
        Ok(value.to_string())
    }
}

impl Bootloader for SystemdBoot {
    fn name(&self) -> &'static str {
        NAME
    }

    fn init(&self, handle: &mut Handle) -> Result<()> {
        let namespace = plugin_namespace(NAME)?;
        let mut defaults = PropertySet::new();
        defaults.add_default("efi", "/efi", &namespace)?;
        defaults.add_default("boot", "/boot", &namespace)?;
        handle.merge_default_properties(&defaults, &namespace);
        Ok(())
    }

    fn pre_activate(&self, _handle: &Handle) -> Result<()> {
        Ok(())
    }

    /// Rewrite the ESP line of the boot environment's fstab so the
    /// environment mounts its own kernel directory on `/boot`.
    fn mid_activate(&self, handle: &Handle, data: &ActivateData) -> Result<()> {
        let efi = Self::required_prop(handle, "efi")?;
        let boot = Self::required_prop(handle, "boot")?;
        let fstab = data.be_mountpoint.join("etc/fstab");
        update_fstab(&fstab, &efi, &boot, &data.be_name).map_err(plugin_err)
    }

    /// Make the activated boot environment's loader entry the default.
    fn post_activate(&self, handle: &Handle, be_name: &str) -> Result<()> {
        let efi = Self::required_prop(handle, "efi")?;
        let loader = Utf8Path::new(&efi).join("loader/loader.conf");
        update_loader_default(&loader, be_name).map_err(plugin_err)
    }

    /// Remove the destroyed boot environment's loader entry and kernel
    /// directory from the ESP.
    fn post_destroy(&self, handle: &Handle, be_name: &str) -> Result<()> {
        let efi = Self::required_prop(handle, "efi")?;
        let entry = Utf8Path::new(&efi).join(format!("loader/entries/{ENTRY_PREFIX}-{be_name}.conf"));
        let kernels = Utf8Path::new(&efi).join(format!("env/{ENTRY_PREFIX}-{be_name}"));
        fs::remove_file(&entry)
            .with_context(|| format!("Removing loader entry {entry}"))
            .map_err(plugin_err)?;
        fs::remove_dir_all(&kernels)
            .with_context(|| format!("Removing kernel directory {kernels}"))
            .map_err(plugin_err)?;
        Ok(())
    }
}

fn plugin_err(e: anyhow::Error) -> Error {
    err!(PluginError, "{e:#}")
}

#[context("Updating fstab")]
fn update_fstab(fstab: &Utf8Path, efi: &str, boot: &str, be_name: &str) -> anyhow::Result<()> {
    let contents = fs::read_to_string(fstab).with_context(|| format!("Reading {fstab}"))?;
    let rewritten = rewrite_fstab(&contents, efi, boot, be_name)?;
    if rewritten == contents {
        tracing::debug!("no ESP entry matched in {fstab}");
        return Ok(());
    }
    zectl_utils::copy_file(fstab, fstab.with_extension("bak"))
        .with_context(|| format!("Backing up {fstab}"))?;
    replace_atomically(fstab, &rewritten)
}

#[context("Updating loader.conf")]
fn update_loader_default(loader: &Utf8Path, be_name: &str) -> anyhow::Result<()> {
    let contents = fs::read_to_string(loader).with_context(|| format!("Reading {loader}"))?;
    let rewritten = rewrite_loader_default(&contents, be_name);
    replace_atomically(loader, &rewritten)
}

/// Atomic same-directory tempfile-and-rename replacement.
fn replace_atomically(path: &Utf8Path, contents: &str) -> anyhow::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("{path} has no parent directory"))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Creating temporary file in {dir}"))?;
    tmp.write_all(contents.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path)
        .with_context(|| format!("Replacing {path}"))?;
    Ok(())
}

/// Replace the boot environment name in the ESP kernel-directory entry
/// (`<efi>/env/org.zectl-<be>  <boot>  ...`); all other lines pass
/// through unchanged.
fn rewrite_fstab(contents: &str, efi: &str, boot: &str, be_name: &str) -> anyhow::Result<String> {
    let pattern = format!(
        r"^(?P<head>[\t ]*{}/env/{}-)\S+(?P<tail>[\t ]+{}(?:[\t ]|$).*)$",
        regex::escape(efi),
        regex::escape(ENTRY_PREFIX),
        regex::escape(boot),
    );
    let re = regex::Regex::new(&pattern).context("Compiling fstab pattern")?;

    let mut out = String::with_capacity(contents.len());
    for line in contents.lines() {
        match re.captures(line) {
            Some(caps) => {
                out.push_str(&caps["head"]);
                out.push_str(be_name);
                out.push_str(&caps["tail"]);
            }
            None => out.push_str(line),
        }
        out.push('\n');
    }
    Ok(out)
}

/// Point the `default` line at the boot environment's entry, appending
/// one if the configuration has none.
fn rewrite_loader_default(contents: &str, be_name: &str) -> String {
    let default_line = format!("default {ENTRY_PREFIX}-{be_name}.conf");
    let mut replaced = false;
    let mut out = String::with_capacity(contents.len());
    for line in contents.lines() {
        if !replaced && line.trim_start().starts_with("default") {
            out.push_str(&default_line);
            replaced = true;
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    if !replaced {
        out.push_str(&default_line);
        out.push('\n');
    }
    out
}
