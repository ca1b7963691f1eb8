//! # Lattice Core Kernel
//!
//! The `kernel` module holds the framework instance itself: the shared
//! [`CoreContext`] every bundle, registration and listener refers back to,
//! and the [`Framework`] handle that drives the system bundle through
//! init, start and stop.
//!
//! ## Key Responsibilities & Components:
//!
//! - **Framework lifecycle**: [`Framework`] and its [`FrameworkBuilder`]
//!   in the `framework` submodule.
//! - **Shared state**: [`CoreContext`] owns the bundle table, the service
//!   and listener registries and the start gate.
//! - **Configuration**: [`FrameworkConfig`] launch settings, loadable from
//!   JSON, YAML or TOML files.
//! - **Callback containment**: the `guard` submodule turns user callback
//!   errors and panics into shareable errors.
//! - **Diagnostics**: [`DiagnosticLog`] for failures that must not become
//!   events.
//! - **Error Handling**: [`Error`](error::Error) and the `Result` alias.
pub mod config;
pub mod constants;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod framework;
pub mod guard;

pub use config::{ConfigError, ConfigFormat, FrameworkConfig};
pub use context::{BundleValidator, CoreContext};
pub use diagnostics::DiagnosticLog;
pub use error::{Error, Result};
pub use framework::{Framework, FrameworkBuilder};
pub use guard::{BoxError, PanicError, SharedError};

#[cfg(test)]
mod tests;
