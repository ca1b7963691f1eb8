//! # Lattice Core Event System
//!
//! Lifecycle, framework and service events plus the [`ListenerRegistry`]
//! that delivers them.
//!
//! Delivery is synchronous on the thread that raised the event. The
//! registry snapshots the matching listeners under its lock and invokes
//! them after releasing it, so a callback may add or remove listeners.
//! A failing bundle or service listener is reported as a framework
//! `Error` event; a failing framework listener is only written to the
//! diagnostic log.
//!
//! ## Key Submodules
//! - `types`: [`BundleEvent`], [`FrameworkEvent`], [`ServiceEvent`].
//! - `listeners`: the three listener tables and the delivery paths.
//! - `error`: [`ListenerError`].

pub mod error;
pub mod listeners;
pub mod types;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::kernel::guard::BoxError;

pub use error::ListenerError;
pub use listeners::{ListenerRegistry, ServiceListenerEntry};
pub use types::{
    BundleEvent, BundleEventKind, FrameworkEvent, FrameworkEventKind, ServiceEvent, ServiceEventKind,
};

/// Core event trait
pub trait Event: Any + fmt::Debug + Send + Sync {
    /// Get the name of this event
    fn name(&self) -> &'static str;

    /// Cast to Any for downcasting
    fn as_any(&self) -> &dyn Any;
}

/// Callback for framework events.
pub type FrameworkListener = Arc<dyn Fn(&FrameworkEvent) -> Result<(), BoxError> + Send + Sync>;
/// Callback for bundle lifecycle events.
pub type BundleListener = Arc<dyn Fn(&BundleEvent) -> Result<(), BoxError> + Send + Sync>;
/// Callback for service events.
pub type ServiceListener = Arc<dyn Fn(&ServiceEvent) -> Result<(), BoxError> + Send + Sync>;

/// Token returned when a listener is added; pass it back to remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerToken(pub(crate) u64);

impl ListenerToken {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Identity used by the legacy removal path: the address of the callback
/// target plus an opaque data address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerIdentity {
    pub target: usize,
    pub data: usize,
}

impl ListenerIdentity {
    pub fn new(target: usize, data: usize) -> Self {
        Self { target, data }
    }

    /// Identity derived from the addresses of two objects.
    pub fn of<T: ?Sized, D: ?Sized>(target: &T, data: &D) -> Self {
        Self {
            target: target as *const T as *const () as usize,
            data: data as *const D as *const () as usize,
        }
    }
}
