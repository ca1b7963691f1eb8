//! # Lattice Core Service Errors
use thiserror::Error;

use crate::kernel::guard::SharedError;
use crate::properties::PropertyError;
use crate::service::ServiceId;

/// Expected failure modes of obtaining a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceErrorKind {
    /// The factory produced an unusable result (empty or incomplete map).
    FactoryError,
    /// The factory returned an error or panicked.
    FactoryException,
    /// The factory re-entered `get_service` for the same bundle and service.
    FactoryRecursion,
    /// The service has been unregistered.
    Unavailable,
}

#[derive(Debug, Error, Clone)]
pub enum ServiceError {
    #[error("Service factory failure ({kind:?}) for service #{service_id}: {message}")]
    Factory {
        kind: ServiceErrorKind,
        service_id: ServiceId,
        message: String,
        #[source]
        source: Option<SharedError>,
    },

    #[error("Service #{service_id} is no longer available")]
    Unavailable { service_id: ServiceId },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Illegal state for service #{service_id}: {message}")]
    IllegalState { service_id: ServiceId, message: String },

    #[error("Invalid service properties: {0}")]
    Properties(#[from] PropertyError),
}

impl ServiceError {
    pub(crate) fn factory(kind: ServiceErrorKind, service_id: ServiceId, message: impl Into<String>, source: Option<SharedError>) -> Self {
        ServiceError::Factory { kind, service_id, message: message.into(), source }
    }

    /// The failure kind for get/unget errors.
    pub fn kind(&self) -> Option<ServiceErrorKind> {
        match self {
            ServiceError::Factory { kind, .. } => Some(*kind),
            ServiceError::Unavailable { .. } => Some(ServiceErrorKind::Unavailable),
            _ => None,
        }
    }
}
