//! Containment for user callbacks (activators, factories, listeners).
//!
//! Callbacks report failure by returning `Err(BoxError)` or by panicking.
//! Both are turned into a [`SharedError`] so the framework can carry them
//! inside events and errors.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;

/// Error type returned by user callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A captured error that can be shared between events and callers.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// A callback panicked instead of returning an error.
#[derive(Debug, Error, Clone)]
#[error("callback panicked: {message}")]
pub struct PanicError {
    pub message: String,
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic reason".to_string()
    }
}

/// Runs a user callback, capturing both returned errors and panics.
pub(crate) fn guarded<R>(f: impl FnOnce() -> Result<R, BoxError>) -> Result<R, SharedError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(Arc::from(err)),
        Err(payload) => Err(Arc::new(PanicError { message: panic_message(payload.as_ref()) })),
    }
}
