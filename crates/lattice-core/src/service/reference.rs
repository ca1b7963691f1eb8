use std::cmp::{Ordering, Reverse};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use serde_json::Value;

use crate::bundle::Bundle;
use crate::kernel::context::CoreContext;
use crate::properties::Properties;
use crate::service::registration::RegistrationCore;
use crate::service::{ServiceId, ServiceScope};

/// Lightweight handle to a registered service.
///
/// A reference holds the service id and the registry generation it was
/// issued in. Once the service is unregistered (or the registry cleared)
/// the reference is simply invalid: queries return `None` or empty values.
///
/// References order by ranking, then by id with the older (lower) id
/// being greater, so the "best" service is the maximum.
#[derive(Clone)]
pub struct ServiceReference {
    id: ServiceId,
    generation: u64,
    interface: Option<String>,
    context: Weak<CoreContext>,
}

impl ServiceReference {
    pub(crate) fn new(core: &RegistrationCore, context: Weak<CoreContext>, interface: Option<String>) -> Self {
        Self { id: core.id, generation: core.generation, interface, context }
    }

    pub(crate) fn resolve(&self) -> Option<Arc<RegistrationCore>> {
        self.context.upgrade()?.services().lookup(self.id, self.generation)
    }

    pub(crate) fn framework(&self) -> Option<Arc<CoreContext>> {
        self.context.upgrade()
    }

    pub fn id(&self) -> ServiceId {
        self.id
    }

    /// Interface name this reference was looked up under, if any.
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    /// True until unregistration of the service completes.
    pub fn is_valid(&self) -> bool {
        self.resolve().is_some()
    }

    pub fn is_available(&self) -> bool {
        self.resolve().is_some_and(|core| core.state.lock().available)
    }

    pub fn property(&self, key: &str) -> Option<Value> {
        self.resolve().and_then(|core| core.properties.lock().get(key).cloned())
    }

    pub fn property_keys(&self) -> Vec<String> {
        self.resolve()
            .map(|core| core.properties.lock().keys().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn properties(&self) -> Option<Properties> {
        self.resolve().map(|core| core.properties.snapshot())
    }

    pub fn ranking(&self) -> i64 {
        self.resolve().map(|core| core.order_key().0).unwrap_or(0)
    }

    pub fn scope(&self) -> Option<ServiceScope> {
        self.resolve().map(|core| core.scope)
    }

    /// The bundle that registered the service.
    pub fn bundle(&self) -> Option<Bundle> {
        self.resolve().and_then(|core| core.bundle.upgrade())
    }

    /// Bundles currently holding the service.
    pub fn using_bundles(&self) -> Vec<Bundle> {
        let Some(core) = self.resolve() else {
            return Vec::new();
        };
        let state = core.state.lock();
        let mut bundles: Vec<Bundle> = state
            .dependents
            .values()
            .filter_map(|d| d.bundle.upgrade())
            .chain(state.prototype_instances.values().filter_map(|(b, _)| b.upgrade()))
            .collect();
        bundles.sort_by_key(Bundle::id);
        bundles.dedup_by_key(|b| b.id());
        bundles
    }

    /// Whether the service publishes `interface`.
    pub fn is_assignable_to(&self, interface: &str) -> bool {
        self.resolve().is_some_and(|core| core.classes.iter().any(|c| c == interface))
    }

    fn sort_key(&self) -> (i64, Reverse<ServiceId>) {
        (self.ranking(), Reverse(self.id))
    }
}

impl PartialEq for ServiceReference {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.generation == other.generation && Weak::ptr_eq(&self.context, &other.context)
    }
}

impl Eq for ServiceReference {}

impl Hash for ServiceReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.generation.hash(state);
    }
}

impl PartialOrd for ServiceReference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServiceReference {
    fn cmp(&self, other: &Self) -> Ordering {
        if self == other {
            return Ordering::Equal;
        }
        self.sort_key().cmp(&other.sort_key()).then(self.generation.cmp(&other.generation))
    }
}

impl fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceReference")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("interface", &self.interface)
            .finish()
    }
}
