use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

use parking_lot::{Condvar, Mutex};

use crate::bundle::{Bundle, BundleId, WeakBundle};
use crate::kernel::context::CoreContext;
use crate::properties::{Properties, SharedProperties};
use crate::service::{InterfaceMapPtr, ServiceError, ServiceId, ServiceObject, ServiceReference, ServiceScope};

/// A consuming bundle and its outstanding `get_service` count.
pub(crate) struct Dependent {
    pub(crate) bundle: WeakBundle,
    pub(crate) count: usize,
}

/// Mutable part of a registration, guarded by the registration lock.
pub(crate) struct RegistrationState {
    pub(crate) available: bool,
    pub(crate) unregistering: bool,
    /// Cleared once unregistration has finished.
    pub(crate) service: Option<ServiceObject>,
    pub(crate) dependents: HashMap<BundleId, Dependent>,
    pub(crate) bundle_instances: HashMap<BundleId, (WeakBundle, InterfaceMapPtr)>,
    pub(crate) prototype_instances: HashMap<BundleId, (WeakBundle, Vec<InterfaceMapPtr>)>,
    /// Consumers whose bundle-scoped instance is being produced, and the
    /// thread calling the factory for them.
    pub(crate) producing: HashMap<BundleId, ThreadId>,
}

impl RegistrationState {
    pub(crate) fn add_dependent(&mut self, bundle: &Bundle) {
        self.dependents
            .entry(bundle.id())
            .or_insert_with(|| Dependent { bundle: bundle.downgrade(), count: 0 })
            .count += 1;
    }

    pub(crate) fn is_used_by(&self, bundle_id: BundleId) -> bool {
        self.dependents.contains_key(&bundle_id)
            || self.bundle_instances.contains_key(&bundle_id)
            || self.prototype_instances.contains_key(&bundle_id)
    }
}

/// Shared registration record. The registry's arena owns it until
/// unregistration completes; references reach it by id and generation.
pub(crate) struct RegistrationCore {
    pub(crate) id: ServiceId,
    pub(crate) generation: u64,
    pub(crate) bundle: WeakBundle,
    pub(crate) bundle_id: BundleId,
    pub(crate) classes: Vec<String>,
    pub(crate) scope: ServiceScope,
    pub(crate) ranking: AtomicI64,
    pub(crate) properties: SharedProperties,
    pub(crate) state: Mutex<RegistrationState>,
    /// Signalled when an entry leaves `producing`.
    pub(crate) produced: Condvar,
}

impl RegistrationCore {
    pub(crate) fn new(
        id: ServiceId,
        generation: u64,
        bundle: &Bundle,
        classes: Vec<String>,
        ranking: i64,
        properties: Properties,
        service: ServiceObject,
    ) -> Self {
        Self {
            id,
            generation,
            bundle: bundle.downgrade(),
            bundle_id: bundle.id(),
            classes,
            scope: service.scope(),
            ranking: AtomicI64::new(ranking),
            properties: SharedProperties::new(properties),
            state: Mutex::new(RegistrationState {
                available: true,
                unregistering: false,
                service: Some(service),
                dependents: HashMap::new(),
                bundle_instances: HashMap::new(),
                prototype_instances: HashMap::new(),
                producing: HashMap::new(),
            }),
            produced: Condvar::new(),
        }
    }

    /// Greater keys sort first: higher ranking, then lower id.
    pub(crate) fn order_key(&self) -> (i64, Reverse<ServiceId>) {
        (self.ranking.load(Ordering::Acquire), Reverse(self.id))
    }
}

impl fmt::Debug for RegistrationCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationCore")
            .field("id", &self.id)
            .field("bundle_id", &self.bundle_id)
            .field("classes", &self.classes)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Handle returned to the bundle that registered a service.
#[derive(Clone)]
pub struct ServiceRegistration {
    pub(crate) core: Arc<RegistrationCore>,
    context: Weak<CoreContext>,
}

impl ServiceRegistration {
    pub(crate) fn new(core: Arc<RegistrationCore>, context: Weak<CoreContext>) -> Self {
        Self { core, context }
    }

    fn framework(&self) -> Result<Arc<CoreContext>, ServiceError> {
        self.context.upgrade().ok_or_else(|| ServiceError::IllegalState {
            service_id: self.core.id,
            message: "framework has been dropped".to_string(),
        })
    }

    pub fn id(&self) -> ServiceId {
        self.core.id
    }

    pub fn scope(&self) -> ServiceScope {
        self.core.scope
    }

    pub fn interfaces(&self) -> &[String] {
        &self.core.classes
    }

    pub fn bundle(&self) -> Option<Bundle> {
        self.core.bundle.upgrade()
    }

    pub fn is_available(&self) -> bool {
        self.core.state.lock().available
    }

    pub fn properties(&self) -> Properties {
        self.core.properties.snapshot()
    }

    pub fn reference(&self) -> ServiceReference {
        ServiceReference::new(&self.core, self.context.clone(), None)
    }

    /// A reference bound to one of the registered interface names.
    pub fn reference_for(&self, interface: &str) -> Option<ServiceReference> {
        self.core
            .classes
            .iter()
            .any(|c| c == interface)
            .then(|| ServiceReference::new(&self.core, self.context.clone(), Some(interface.to_string())))
    }

    /// Replaces the service properties. The reserved keys (object classes,
    /// id and scope) keep their registered values.
    pub fn set_properties(&self, properties: Properties) -> Result<(), ServiceError> {
        let framework = self.framework()?;
        framework.services().set_properties(&framework, &self.core, properties)
    }

    /// Unregisters the service. A call made while another unregistration is
    /// in progress is ignored; a call on a finished one is an error.
    pub fn unregister(&self) -> Result<(), ServiceError> {
        let framework = self.framework()?;
        framework.services().unregister(&framework, &self.core)
    }
}

impl PartialEq for ServiceRegistration {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl Eq for ServiceRegistration {}

impl fmt::Debug for ServiceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistration")
            .field("id", &self.core.id)
            .field("bundle_id", &self.core.bundle_id)
            .field("interfaces", &self.core.classes)
            .finish()
    }
}
