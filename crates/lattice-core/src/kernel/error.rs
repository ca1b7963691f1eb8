//! # Lattice Core Kernel Errors
//!
//! [`Error`] gathers the typed errors of every subsystem so that
//! [`BundleContext`](crate::bundle::BundleContext) operations and the
//! [`Framework`](crate::kernel::Framework) handle can return a single
//! [`Result`] type while keeping the original error reachable.
use std::path::PathBuf;
use std::result::Result as StdResult;

use thiserror::Error as ThisError;

use crate::bundle::BundleError;
use crate::event::ListenerError;
use crate::filter::FilterError;
use crate::kernel::config::ConfigError;
use crate::properties::PropertyError;
use crate::service::ServiceError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Bundle error: {0}")]
    Bundle(#[from] BundleError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Property error: {0}")]
    Property(#[from] PropertyError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error during operation '{operation}' on path '{}': {source}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        operation: String,
        path: PathBuf,
    },

    /// Generic error with message
    #[error("Error: {0}")]
    Other(String),
}

/// Shorthand for Result with our Error type
pub type Result<T> = StdResult<T, Error>;

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl Error {
    /// I/O error with the operation and path it happened on.
    pub fn io(source: std::io::Error, operation: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Error::Io { source, operation: operation.into(), path: path.into() }
    }

    /// The bundle error inside, if this is one.
    pub fn as_bundle_error(&self) -> Option<&BundleError> {
        match self {
            Error::Bundle(err) => Some(err),
            _ => None,
        }
    }

    pub fn as_service_error(&self) -> Option<&ServiceError> {
        match self {
            Error::Service(err) => Some(err),
            _ => None,
        }
    }
}
