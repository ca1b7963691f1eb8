use std::fmt;
use std::sync::Arc;

use crate::bundle::Bundle;
use crate::kernel::guard::BoxError;
use crate::service::{InterfaceMap, InterfaceMapPtr, ServiceRegistration, ServiceScope};

/// Produces service objects on demand, one per consuming bundle.
///
/// Both methods run with no framework locks held and may call back into
/// the framework.
pub trait ServiceFactory: Send + Sync {
    fn get_service(&self, bundle: &Bundle, registration: &ServiceRegistration) -> Result<InterfaceMapPtr, BoxError>;

    fn unget_service(
        &self,
        bundle: &Bundle,
        registration: &ServiceRegistration,
        service: &InterfaceMapPtr,
    ) -> Result<(), BoxError>;
}

/// A factory whose services are produced per request
/// (see [`ServiceObjects`](crate::service::ServiceObjects)).
pub trait PrototypeServiceFactory: ServiceFactory {}

/// The forms a service can be registered as.
#[derive(Clone)]
pub enum ServiceObject {
    Instance(InterfaceMapPtr),
    Factory {
        interfaces: Vec<String>,
        factory: Arc<dyn ServiceFactory>,
        scope: ServiceScope,
    },
}

impl ServiceObject {
    pub fn instance(map: InterfaceMap) -> Self {
        ServiceObject::Instance(Arc::new(map))
    }

    /// A bundle-scoped factory publishing under `interfaces`.
    pub fn factory<F: ServiceFactory + 'static>(interfaces: Vec<String>, factory: Arc<F>) -> Self {
        ServiceObject::Factory { interfaces, factory, scope: ServiceScope::Bundle }
    }

    /// A prototype-scoped factory publishing under `interfaces`.
    pub fn prototype<F: PrototypeServiceFactory + 'static>(interfaces: Vec<String>, factory: Arc<F>) -> Self {
        ServiceObject::Factory { interfaces, factory, scope: ServiceScope::Prototype }
    }

    pub fn scope(&self) -> ServiceScope {
        match self {
            ServiceObject::Instance(_) => ServiceScope::Singleton,
            ServiceObject::Factory { scope, .. } => *scope,
        }
    }

    /// Interface names, sorted for a stable object-class list.
    pub fn interfaces(&self) -> Vec<String> {
        let mut names: Vec<String> = match self {
            ServiceObject::Instance(map) => map.keys().cloned().collect(),
            ServiceObject::Factory { interfaces, .. } => interfaces.clone(),
        };
        names.sort();
        names.dedup();
        names
    }
}

impl fmt::Debug for ServiceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceObject")
            .field("scope", &self.scope())
            .field("interfaces", &self.interfaces())
            .finish()
    }
}
