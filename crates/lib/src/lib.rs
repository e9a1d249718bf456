//! # ZFS boot environment manager
//!
//! This crate implements the boot environment lifecycle engine behind
//! the `zectl` binary (`crates/cli`), which is a thin wrapper around
//! [`cli::run_from_iter`].
//!
//! A boot environment (BE) is a bootable clone of the root filesystem
//! dataset tree. The engine creates BEs from copy-on-write snapshots,
//! activates one as the next-boot target, mounts them for offline
//! inspection and destroys the ones no longer needed, while never
//! touching the running or activated BE.
//!
//! # Module Index
//!
//! - [`cli`] - Command-line interface implementation (clap-based)
//! - [`handle`] - Per-invocation session state ([`handle::Handle`])
//! - [`props`] - The namespaced property store (`org.zectl:*`)
//! - [`bootpool`] - Optional separate boot pool mirror
//! - [`store`] - Dataset store abstraction (system `zfs` and in-memory)
//! - [`mounts`] - Mount table lookups
//! - [`plugin`] - Bootloader plugin contract and selection
//! - [`list`] - Derived boot environment rows
//!
//! The lifecycle operations (create, activate, destroy, rename, mount,
//! unmount, snapshot) are methods on [`handle::Handle`], one module per
//! operation.
//!
//! The API is internal and not stable for external consumption.

mod activate;
pub mod bootpool;
pub mod cli;
mod create;
mod destroy;
pub mod errors;
pub mod handle;
pub mod list;
mod mount;
pub mod mounts;
pub mod plugin;
mod plugins;
pub mod props;
mod rename;
mod snapshot;
pub mod store;

pub use create::CreateOptions;
pub use destroy::DestroyOptions;
pub use errors::{Error, ErrorKind, Result};
pub use handle::Handle;
