//! # Lattice Core Service Registry
//!
//! Services are interface-keyed objects published by bundles together with
//! a property dictionary. Consumers look them up through
//! [`ServiceReference`]s, which stay cheap to copy and simply become
//! invalid once the service is unregistered.
//!
//! ## Key Submodules
//! - `registry`: the by-class and by-registration indices and the
//!   get/unget bookkeeping, including the factory recursion guard.
//! - `registration`: the owner's handle ([`ServiceRegistration`]).
//! - `reference`: [`ServiceReference`] and its ranking order.
//! - `factory`: [`ServiceFactory`] and the [`ServiceObject`] forms a service
//!   can be registered as.
//! - `objects`: [`ServiceObjects`] for prototype-scoped instances.
//! - `hooks`: [`FindHook`]s that may hide references from a requester.
//!
//! ## Locking
//!
//! Locks are always taken in this order: registry tables, then a
//! registration's state, then its properties. Factories and listeners run
//! with none of them held.

pub mod error;
pub mod factory;
pub mod hooks;
pub mod objects;
pub mod reference;
pub mod registration;
pub mod registry;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::kernel::constants::{SCOPE_BUNDLE, SCOPE_PROTOTYPE, SCOPE_SINGLETON};

pub use error::{ServiceError, ServiceErrorKind};
pub use factory::{PrototypeServiceFactory, ServiceFactory, ServiceObject};
pub use hooks::{FindHook, HookId, ServiceHooks};
pub use objects::ServiceObjects;
pub use reference::ServiceReference;
pub use registration::ServiceRegistration;
pub use registry::ServiceRegistry;

/// Numeric service id, unique within a framework instance.
pub type ServiceId = u64;

/// A service object as published under each of its interface names.
pub type InterfaceMap = HashMap<String, Arc<dyn Any + Send + Sync>>;
/// Shared handle to an [`InterfaceMap`] handed out to consumers.
pub type InterfaceMapPtr = Arc<InterfaceMap>;

/// Default interface name for a Rust type.
pub fn service_interface<T: ?Sized + 'static>() -> String {
    std::any::type_name::<T>().to_string()
}

/// Builds an interface map publishing `service` under the name of `T`.
pub fn interface_map<T: Any + Send + Sync>(service: Arc<T>) -> InterfaceMap {
    let mut map = InterfaceMap::new();
    map.insert(service_interface::<T>(), service as Arc<dyn Any + Send + Sync>);
    map
}

/// Extracts the object published under `T`'s interface name.
pub fn extract<T: Any + Send + Sync>(map: &InterfaceMap) -> Option<Arc<T>> {
    map.get(&service_interface::<T>()).and_then(|obj| obj.clone().downcast::<T>().ok())
}

/// How instances of a service are shared between consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceScope {
    /// One object for everyone.
    Singleton,
    /// One factory-produced object per consuming bundle.
    Bundle,
    /// A factory-produced object per request through [`ServiceObjects`].
    Prototype,
}

impl ServiceScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceScope::Singleton => SCOPE_SINGLETON,
            ServiceScope::Bundle => SCOPE_BUNDLE,
            ServiceScope::Prototype => SCOPE_PROTOTYPE,
        }
    }
}

impl fmt::Display for ServiceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
