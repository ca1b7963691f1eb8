//! # Lattice Core Bundles
//!
//! A bundle is the unit of deployment: a manifest, an archive of resources
//! and, optionally, a module exporting a [`BundleActivator`]. Bundles move
//! through the states INSTALLED, RESOLVED, STARTING, ACTIVE, STOPPING and
//! finally UNINSTALLED.
//!
//! ## Key Submodules
//! - `lifecycle`: the [`Bundle`] handle and its state machine, including
//!   start/stop timeouts and the abort protocol.
//! - `context`: [`BundleContext`], the per-activation handle given to
//!   activators.
//! - `thread`: worker threads that run activator callbacks.
//! - `registry`: the installed-bundle table.
//! - `manifest`, `archive`, `loader`, `activator`: what a bundle is made of
//!   and how its code is brought in.
//!
//! Transitions of one bundle are serialized by a per-bundle lock. A start
//! or stop hands the activator call to a worker thread so the caller can
//! stop waiting after a timeout; if it does, the framework rolls the
//! bundle back to RESOLVED itself and abandons the worker.

pub mod activator;
pub mod archive;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod loader;
pub mod manifest;
pub mod registry;
pub mod state;
pub(crate) mod thread;

pub use activator::{ActivatorInstance, BundleActivator};
pub use archive::{BundleArchive, DirectoryArchive, MemoryArchive};
pub use context::{BundleContext, ContextId};
pub use error::{AbortCause, ActivatorPhase, BundleError};
pub use lifecycle::{Bundle, WeakBundle};
pub use loader::{ActivatorConstructor, LibraryLoader, ModuleHandle, ModuleLoader, StaticModuleLoader};
pub use manifest::BundleManifest;
pub use registry::BundleRegistry;
pub use state::{BundleState, StartOptions, StopOptions};

/// Numeric bundle id. The system bundle is `0`.
pub type BundleId = u64;

#[cfg(test)]
mod tests;
