//! Command-line interface implementation.
//!
//! The `zectl` binary is a thin wrapper delegating to
//! [`run_from_iter`]. One invocation builds a handle, runs exactly one
//! lifecycle operation and exits; errors are printed by the binary's
//! `run_main` wrapper.

use std::ffi::OsString;
use std::io::Write as _;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use comfy_table::{presets::NOTHING, Table};

use crate::errors::ErrorKind;
use crate::handle::Handle;
use crate::plugin::PROP_BOOTLOADER;
use crate::props::{parse_qualified_name, PropertySet, PROP_NAMESPACE};
use crate::{bootpool, create::CreateOptions, destroy::DestroyOptions, list::BootEnvironment};

/// Manage ZFS boot environments.
#[derive(Debug, Parser)]
#[command(name = "zectl", version, about)]
pub struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Activate a boot environment as the next-boot target
    Activate {
        /// Boot environment name
        be_name: String,
    },
    /// Create a new boot environment
    Create {
        /// Clone from an existing dataset or dataset@snapshot instead
        /// of the activated boot environment
        #[arg(short = 'e', long = "existing", value_name = "DATASET[@SNAPSHOT]")]
        existing: Option<String>,
        /// Snapshot and clone the source recursively
        #[arg(short, long)]
        recursive: bool,
        /// Name of the new boot environment
        be_name: String,
    },
    /// Destroy a boot environment or one of its snapshots
    Destroy {
        /// Unmount the boot environment if it is mounted
        #[arg(short = 'F', long)]
        force: bool,
        /// Keep the origin snapshots of destroyed clones
        #[arg(short = 'k', long)]
        keep_origin: bool,
        /// Boot environment name, or name@snapshot
        be_name: String,
    },
    /// Print boot environment properties
    Get {
        /// Scripted mode: tab-separated, no headers
        #[arg(short = 'H')]
        scripted: bool,
        /// A single property to print (e.g. bootloader or grub:boot)
        property: Option<String>,
    },
    /// List boot environments
    List {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Mount a boot environment for inspection
    Mount {
        /// Boot environment name
        be_name: String,
        /// Mountpoint (a temporary directory is created if omitted)
        mountpoint: Option<Utf8PathBuf>,
    },
    /// Rename a boot environment
    Rename {
        /// Current name
        be_name: String,
        /// New name
        new_be_name: String,
    },
    /// Set boot environment properties
    Set {
        /// Properties as [namespace:]name=value
        #[arg(required = true, value_name = "PROPERTY=VALUE")]
        properties: Vec<String>,
    },
    /// Snapshot a boot environment
    Snapshot {
        /// Boot environment name
        be_name: String,
    },
    /// Unmount a boot environment
    Unmount {
        /// Boot environment name
        be_name: String,
    },
}

/// Parse the arguments and run the requested operation against the
/// running system.
pub fn run_from_iter<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    let mut handle = Handle::open_system()?;

    // A configured-but-unknown bootloader is recoverable: warn and run
    // without bootloader integration.
    if let Err(e) = handle.bootloader_set() {
        if e.kind() != ErrorKind::NotFound {
            return Err(e.into());
        }
        let bootloader = handle.prop(PROP_BOOTLOADER, PROP_NAMESPACE);
        let mut stderr = anstream::stderr();
        let _ = writeln!(
            stderr,
            "WARNING: No bootloader plugin found under bootloader={bootloader}.\n\
             Continuing with no bootloader plugin."
        );
    }

    handle.boot_pool_set()?;
    handle.validate_system()?;
    seed_default_properties(&mut handle)?;

    match cli.command {
        Cmd::Activate { be_name } => {
            handle.activate(&be_name)?;
            println!("Activated boot environment '{be_name}'");
        }
        Cmd::Create {
            existing,
            recursive,
            be_name,
        } => {
            let options = CreateOptions {
                be_name: be_name.clone(),
                existing,
                recursive,
            };
            handle.create(&options)?;
            println!("Created boot environment '{be_name}'");
        }
        Cmd::Destroy {
            force,
            keep_origin,
            be_name,
        } => {
            let options = DestroyOptions {
                be_name: be_name.clone(),
                destroy_origin: !keep_origin,
                force,
            };
            handle.destroy(&options)?;
            println!("Destroyed '{be_name}'");
        }
        Cmd::Get { scripted, property } => print_properties(&handle, scripted, property)?,
        Cmd::List { json } => print_list(&handle.list()?, json)?,
        Cmd::Mount {
            be_name,
            mountpoint,
        } => {
            let mounted_at = handle.mount(&be_name, mountpoint.as_deref())?;
            println!("{mounted_at}");
        }
        Cmd::Rename {
            be_name,
            new_be_name,
        } => {
            handle.rename(&be_name, &new_be_name)?;
            println!("Renamed boot environment '{be_name}' to '{new_be_name}'");
        }
        Cmd::Set { properties } => handle.set_properties(&properties)?,
        Cmd::Snapshot { be_name } => {
            let snapshot = handle.snapshot(&be_name)?;
            println!("Created snapshot '{snapshot}'");
        }
        Cmd::Unmount { be_name } => {
            handle.unmount(&be_name)?;
            println!("Unmounted boot environment '{be_name}'");
        }
    }
    Ok(())
}

/// Core defaults; merged after plugin selection so plugin defaults and
/// explicit settings are already in place and never overwritten.
fn seed_default_properties(handle: &mut Handle) -> Result<()> {
    let mut defaults = PropertySet::new();
    for name in [
        PROP_BOOTLOADER,
        bootpool::PROP_BOOTPOOL_ROOT,
        bootpool::PROP_BOOTPOOL_PREFIX,
    ] {
        defaults.add_default(name, "", PROP_NAMESPACE)?;
    }
    handle.merge_default_properties(&defaults, PROP_NAMESPACE);
    Ok(())
}

fn active_flags(be: &BootEnvironment) -> String {
    let mut flags = String::new();
    if be.running {
        flags.push('N');
    }
    if be.activated {
        flags.push('R');
    }
    if flags.is_empty() {
        flags.push('-');
    }
    flags
}

fn format_creation(epoch: i64) -> String {
    DateTime::from_timestamp(epoch, 0)
        .map(|t| {
            t.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|| epoch.to_string())
}

fn print_list(environments: &[BootEnvironment], json: bool) -> Result<()> {
    if json {
        let mut stdout = std::io::stdout().lock();
        serde_json::to_writer_pretty(&mut stdout, environments)?;
        writeln!(stdout)?;
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_header(["Name", "Active", "Mountpoint", "Creation"]);
    for be in environments {
        table.add_row([
            be.name.clone(),
            active_flags(be),
            be.mountpoint
                .as_ref()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            format_creation(be.creation),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn print_properties(handle: &Handle, scripted: bool, property: Option<String>) -> Result<()> {
    let mut rows: Vec<(String, String, String)> = Vec::new();
    match property {
        Some(property) => {
            let (namespace, name) = parse_qualified_name(&property)?;
            let entry = handle
                .properties()
                .entry(&name, &namespace)
                .with_context(|| format!("Property '{namespace}:{name}' is not set"))?;
            rows.push((
                format!("{namespace}:{name}"),
                entry.value.clone(),
                entry.source.to_string(),
            ));
        }
        None => {
            for (qualified, entry) in handle.properties().iter() {
                rows.push((
                    qualified.to_string(),
                    entry.value.clone(),
                    entry.source.to_string(),
                ));
            }
        }
    }

    if scripted {
        let mut stdout = std::io::stdout().lock();
        for (name, value, source) in rows {
            writeln!(stdout, "{name}\t{value}\t{source}")?;
        }
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_header(["Property", "Value", "Source"]);
    for (name, value, source) in rows {
        table.add_row([name, value, source]);
    }
    println!("{table}");
    Ok(())
}
