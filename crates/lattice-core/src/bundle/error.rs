//! # Lattice Core Bundle Errors
//!
//! [`BundleError`] covers every failure of installing, resolving, starting,
//! stopping and uninstalling bundles, including activator failures and the
//! abort outcomes of a timed-out or interrupted start/stop.
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::bundle::BundleId;
use crate::kernel::guard::SharedError;

/// Which activator callback an error or abort refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivatorPhase {
    Start,
    Stop,
}

impl fmt::Display for ActivatorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivatorPhase::Start => f.write_str("start()"),
            ActivatorPhase::Stop => f.write_str("stop()"),
        }
    }
}

/// Why the framework gave up waiting for an activator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbortCause {
    Timeout,
    Uninstalled,
}

impl fmt::Display for AbortCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortCause::Timeout => f.write_str("time-out"),
            AbortCause::Uninstalled => f.write_str("uninstalled during operation"),
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum BundleError {
    #[error("Invalid manifest for bundle at '{location}': {reason}")]
    InvalidManifest { location: String, reason: String },

    #[error("Bundle '{symbolic_name}' version {version} is already installed as bundle #{existing_id}")]
    DuplicateBundle { symbolic_name: String, version: String, existing_id: BundleId },

    #[error("Bundle #{bundle_id}: cannot {operation}: {message}")]
    IllegalState { bundle_id: BundleId, operation: &'static str, message: String },

    #[error("Bundle #{bundle_id}: {message}")]
    Logic { bundle_id: BundleId, message: String },

    #[error("Bundle #{bundle_id} ({symbolic_name}) could not be resolved: {reason}")]
    Resolve { bundle_id: BundleId, symbolic_name: String, reason: String },

    #[error("Bundle #{bundle_id} ({symbolic_name}) activator {phase} failed: {source}")]
    ActivatorFailed {
        bundle_id: BundleId,
        symbolic_name: String,
        phase: ActivatorPhase,
        #[source]
        source: SharedError,
    },

    #[error("Bundle #{bundle_id} ({symbolic_name}) {phase} aborted: {cause}")]
    Aborted { bundle_id: BundleId, symbolic_name: String, phase: ActivatorPhase, cause: AbortCause },

    #[error("Bundle #{bundle_id} ({symbolic_name}) failed validation: {reason}")]
    Security {
        bundle_id: BundleId,
        symbolic_name: String,
        reason: String,
        #[source]
        source: Option<SharedError>,
    },

    #[error("Failed to load module '{location}': {message}")]
    Load { location: String, message: String },

    #[error("Module '{location}' does not export symbol '{symbol}'")]
    MissingSymbol { location: String, symbol: String },

    #[error("The bundle context is no longer valid")]
    ContextInvalid,

    #[error("Bundle #{bundle_id} cannot be started while the framework is stopping")]
    FrameworkStopping { bundle_id: BundleId },

    #[error("No storage location is configured for bundle data")]
    NoStorage,

    #[error("Failed to spawn a bundle worker thread: {0}")]
    WorkerSpawn(#[source] Arc<io::Error>),

    #[error("I/O error during {operation} on '{path}': {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
}

impl BundleError {
    pub(crate) fn illegal_state(bundle_id: BundleId, operation: &'static str, message: impl Into<String>) -> Self {
        BundleError::IllegalState { bundle_id, operation, message: message.into() }
    }

    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        BundleError::Io { operation, path: path.into(), source: Arc::new(source) }
    }

    /// The abort cause, if the operation was abandoned rather than failed.
    pub fn abort_cause(&self) -> Option<AbortCause> {
        match self {
            BundleError::Aborted { cause, .. } => Some(*cause),
            _ => None,
        }
    }
}
