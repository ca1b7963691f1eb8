//! # Lattice Core Property Errors
//!
//! Errors raised while building or mutating a [`Properties`](super::Properties)
//! dictionary.
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PropertyError {
    #[error("Properties contain case variants of the same key: '{first}' and '{second}'")]
    CaseVariantKeys { first: String, second: String },

    #[error("Property '{key}' has an invalid value: {reason}")]
    InvalidValue { key: String, reason: String },
}
