//! # Lattice Core Filter Errors
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("Empty filter expression")]
    Empty,

    #[error("Invalid filter '{expression}' at position {position}: {reason}")]
    Syntax {
        expression: String,
        position: usize,
        reason: String,
    },
}
