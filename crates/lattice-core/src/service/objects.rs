use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::bundle::Bundle;
use crate::service::{InterfaceMapPtr, ServiceError, ServiceReference, ServiceScope, service_interface};

/// Per-request access to a service on behalf of one bundle.
///
/// For prototype services every [`get_service`](Self::get_service) call
/// produces a new object that has to be handed back individually. For other
/// scopes it behaves like the context's `get_service`.
#[derive(Clone)]
pub struct ServiceObjects {
    reference: ServiceReference,
    consumer: Bundle,
}

impl ServiceObjects {
    pub(crate) fn new(reference: ServiceReference, consumer: Bundle) -> Self {
        Self { reference, consumer }
    }

    pub fn reference(&self) -> &ServiceReference {
        &self.reference
    }

    pub fn get_service_map(&self) -> Result<InterfaceMapPtr, ServiceError> {
        let id = self.reference.id();
        let framework = self.reference.framework().ok_or(ServiceError::Unavailable { service_id: id })?;
        let core = self.reference.resolve().ok_or(ServiceError::Unavailable { service_id: id })?;
        framework.services().get_prototype_service(&framework, &core, &self.consumer)
    }

    /// The object registered under `T`'s interface name, or `None` if the
    /// service does not publish `T`.
    pub fn get_service<T: Any + Send + Sync>(&self) -> Result<Option<(Arc<T>, InterfaceMapPtr)>, ServiceError> {
        let map = self.get_service_map()?;
        let object = match self.reference.interface() {
            Some(name) if name != service_interface::<T>() => None,
            _ => crate::service::extract::<T>(&map),
        };
        Ok(object.map(|obj| (obj, map)))
    }

    /// Releases an object obtained from this handle.
    pub fn unget_service(&self, service: &InterfaceMapPtr) -> Result<(), ServiceError> {
        let id = self.reference.id();
        let framework = self.reference.framework().ok_or(ServiceError::Unavailable { service_id: id })?;
        let core = self.reference.resolve().ok_or(ServiceError::Unavailable { service_id: id })?;
        framework.services().unget_prototype_service(&framework, &core, &self.consumer, service)
    }

    pub fn scope(&self) -> Option<ServiceScope> {
        self.reference.scope()
    }
}

impl fmt::Debug for ServiceObjects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceObjects")
            .field("reference", &self.reference)
            .field("consumer", &self.consumer.id())
            .finish()
    }
}
