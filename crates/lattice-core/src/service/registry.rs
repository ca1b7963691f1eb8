use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};

use crate::bundle::{Bundle, BundleId, WeakBundle};
use crate::event::{FrameworkEventKind, ServiceEvent, ServiceEventKind};
use crate::filter::Filter;
use crate::kernel::constants::{OBJECTCLASS, SERVICE_ID, SERVICE_RANKING, SERVICE_SCOPE};
use crate::kernel::context::CoreContext;
use crate::kernel::guard::guarded;
use crate::properties::{Properties, PropertyError};
use crate::service::registration::RegistrationCore;
use crate::service::{
    InterfaceMapPtr, ServiceError, ServiceErrorKind, ServiceFactory, ServiceId, ServiceObject, ServiceReference,
    ServiceRegistration, ServiceScope,
};

thread_local! {
    /// (framework, consuming bundle, service) triples currently inside a
    /// factory's `get_service` on this thread.
    static FACTORY_CALLS: RefCell<HashSet<(usize, BundleId, ServiceId)>> = RefCell::new(HashSet::new());
}

/// Marks a factory call in progress; cleared on drop.
struct FactoryCallMark {
    key: (usize, BundleId, ServiceId),
}

impl FactoryCallMark {
    fn enter(key: (usize, BundleId, ServiceId)) -> Option<Self> {
        FACTORY_CALLS.with(|calls| calls.borrow_mut().insert(key)).then_some(Self { key })
    }
}

impl Drop for FactoryCallMark {
    fn drop(&mut self) {
        FACTORY_CALLS.with(|calls| {
            calls.borrow_mut().remove(&self.key);
        });
    }
}

fn ranking_of(props: &Properties) -> Result<i64, PropertyError> {
    match props.get(SERVICE_RANKING) {
        None => Ok(0),
        Some(value) => value.as_i64().ok_or_else(|| PropertyError::InvalidValue {
            key: SERVICE_RANKING.to_string(),
            reason: format!("expected an integer, found {value}"),
        }),
    }
}

#[derive(Default)]
struct RegistryTables {
    /// Per interface name, ordered best-first.
    classes: HashMap<String, Vec<Arc<RegistrationCore>>>,
    registrations: BTreeMap<ServiceId, Arc<RegistrationCore>>,
}

/// Registered services of one framework instance.
pub struct ServiceRegistry {
    tables: Mutex<RegistryTables>,
    /// Arena of live registrations, including ones being unregistered.
    slots: RwLock<HashMap<ServiceId, Arc<RegistrationCore>>>,
    next_id: AtomicU64,
    generation: AtomicU64,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("registrations", &self.tables.lock().registrations.len())
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(RegistryTables::default()),
            slots: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            generation: AtomicU64::new(1),
        }
    }

    /// Number of registered (not yet unregistering) services.
    pub fn len(&self) -> usize {
        self.tables.lock().registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn lookup(&self, id: ServiceId, generation: u64) -> Option<Arc<RegistrationCore>> {
        self.slots.read().get(&id).filter(|core| core.generation == generation).cloned()
    }

    pub(crate) fn register_service(
        &self,
        framework: &CoreContext,
        bundle: &Bundle,
        service: ServiceObject,
        properties: Properties,
    ) -> Result<ServiceRegistration, ServiceError> {
        let classes = service.interfaces();
        if classes.is_empty() {
            return Err(ServiceError::InvalidArgument("can't register an empty interface map".to_string()));
        }
        let ranking = ranking_of(&properties)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let scope = service.scope();

        let mut props = properties;
        props.insert(OBJECTCLASS, json!(classes));
        props.insert(SERVICE_ID, json!(id));
        props.insert(SERVICE_SCOPE, json!(scope.as_str()));

        let generation = self.generation.load(Ordering::Acquire);
        let core = Arc::new(RegistrationCore::new(id, generation, bundle, classes, ranking, props, service));
        {
            let mut tables = self.tables.lock();
            let key = core.order_key();
            for class in &core.classes {
                let list = tables.classes.entry(class.clone()).or_default();
                let pos = list.partition_point(|other| other.order_key() > key);
                list.insert(pos, core.clone());
            }
            tables.registrations.insert(id, core.clone());
        }
        self.slots.write().insert(id, core.clone());
        log::debug!(
            target: "lattice::service",
            "Bundle #{} registered service #{} ({}) as {:?}",
            bundle.id(),
            id,
            scope,
            core.classes
        );

        let registration = ServiceRegistration::new(core.clone(), framework.weak());
        let receivers = framework.listeners().matching_service_listeners(&core.properties.lock());
        let event = ServiceEvent::new(ServiceEventKind::Registered, registration.reference());
        framework.listeners().service_changed(framework, &receivers, &event, None);
        Ok(registration)
    }

    /// Re-sorts the per-interface lists of a registration after its
    /// ranking changed.
    pub(crate) fn update_service_registration_order(&self, core: &RegistrationCore) {
        let mut tables = self.tables.lock();
        for class in &core.classes {
            if let Some(list) = tables.classes.get_mut(class) {
                list.sort_by_key(|reg| std::cmp::Reverse(reg.order_key()));
            }
        }
    }

    /// Removes a registration from both indices. Safe to call repeatedly.
    pub(crate) fn remove_service_registration(&self, core: &RegistrationCore) -> bool {
        let mut tables = self.tables.lock();
        if tables.registrations.remove(&core.id).is_none() {
            return false;
        }
        for class in &core.classes {
            if let Some(list) = tables.classes.get_mut(class) {
                list.retain(|reg| reg.id != core.id);
                if list.is_empty() {
                    tables.classes.remove(class);
                }
            }
        }
        true
    }

    /// References to available services implementing `class` (or all
    /// services) that match `filter`, best first. Installed find hooks may
    /// remove entries before the result is returned.
    pub(crate) fn get(
        &self,
        framework: &CoreContext,
        class: Option<&str>,
        filter: Option<&Filter>,
        requester: Option<&Bundle>,
    ) -> Vec<ServiceReference> {
        let candidates: Vec<Arc<RegistrationCore>> = {
            let tables = self.tables.lock();
            match class {
                Some(class) => tables.classes.get(class).cloned().unwrap_or_default(),
                None => {
                    let mut all: Vec<_> = tables.registrations.values().cloned().collect();
                    all.sort_by_key(|reg| std::cmp::Reverse(reg.order_key()));
                    all
                }
            }
        };
        let mut references: Vec<ServiceReference> = candidates
            .into_iter()
            .filter(|core| core.state.lock().available)
            .filter(|core| filter.is_none_or(|flt| flt.evaluate(&core.properties.lock(), false)))
            .map(|core| ServiceReference::new(&core, framework.weak(), class.map(str::to_string)))
            .collect();
        if let Some(requester) = requester {
            framework.hooks().filter_find(framework, requester, class, filter, &mut references);
        }
        references
    }

    pub(crate) fn registered_by_bundle(&self, framework: &CoreContext, bundle_id: BundleId) -> Vec<ServiceRegistration> {
        self.tables
            .lock()
            .registrations
            .values()
            .filter(|core| core.bundle_id == bundle_id)
            .map(|core| ServiceRegistration::new(core.clone(), framework.weak()))
            .collect()
    }

    pub(crate) fn used_by_bundle(&self, framework: &CoreContext, bundle_id: BundleId) -> Vec<ServiceRegistration> {
        let slots: Vec<_> = self.slots.read().values().cloned().collect();
        let mut used: Vec<_> = slots
            .into_iter()
            .filter(|core| core.state.lock().is_used_by(bundle_id))
            .map(|core| ServiceRegistration::new(core, framework.weak()))
            .collect();
        used.sort_by_key(ServiceRegistration::id);
        used
    }

    /// Drops every registration and starts a new generation, so that
    /// references issued before are no longer valid.
    pub(crate) fn clear(&self) {
        *self.tables.lock() = RegistryTables::default();
        self.slots.write().clear();
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.next_id.store(1, Ordering::Relaxed);
    }

    fn report(&self, framework: &CoreContext, kind: FrameworkEventKind, core: &RegistrationCore, err: &ServiceError) {
        framework.report(kind, core.bundle.upgrade(), err.to_string(), Some(Arc::new(err.clone())));
    }

    fn call_factory_get(
        &self,
        framework: &CoreContext,
        core: &Arc<RegistrationCore>,
        consumer: &Bundle,
        factory: &Arc<dyn ServiceFactory>,
    ) -> Result<InterfaceMapPtr, ServiceError> {
        let Some(_mark) = FactoryCallMark::enter((framework.key(), consumer.id(), core.id)) else {
            let err = ServiceError::factory(
                ServiceErrorKind::FactoryRecursion,
                core.id,
                format!("recursive get_service call by bundle #{}", consumer.id()),
                None,
            );
            self.report(framework, FrameworkEventKind::Error, core, &err);
            return Err(err);
        };
        let registration = ServiceRegistration::new(core.clone(), framework.weak());
        let map = guarded(|| factory.get_service(consumer, &registration)).map_err(|source| {
            let err = ServiceError::factory(ServiceErrorKind::FactoryException, core.id, "factory get_service failed", Some(source));
            self.report(framework, FrameworkEventKind::Error, core, &err);
            err
        })?;
        if map.is_empty() {
            let err = ServiceError::factory(ServiceErrorKind::FactoryError, core.id, "factory returned an empty interface map", None);
            self.report(framework, FrameworkEventKind::Error, core, &err);
            return Err(err);
        }
        if let Some(missing) = core.classes.iter().find(|class| !map.contains_key(*class)) {
            let err = ServiceError::factory(
                ServiceErrorKind::FactoryError,
                core.id,
                format!("factory result does not provide interface '{missing}'"),
                None,
            );
            self.report(framework, FrameworkEventKind::Warning, core, &err);
            return Err(err);
        }
        Ok(map)
    }

    fn call_factory_unget(
        &self,
        framework: &CoreContext,
        core: &Arc<RegistrationCore>,
        consumer: &Bundle,
        factory: &Arc<dyn ServiceFactory>,
        service: &InterfaceMapPtr,
        severity: FrameworkEventKind,
    ) {
        let registration = ServiceRegistration::new(core.clone(), framework.weak());
        if let Err(source) = guarded(|| factory.unget_service(consumer, &registration, service)) {
            let err = ServiceError::factory(ServiceErrorKind::FactoryException, core.id, "factory unget_service failed", Some(source));
            self.report(framework, severity, core, &err);
        }
    }

    /// Obtains the service for `consumer`. Factory-backed services are
    /// produced once per consuming bundle and cached until the use count
    /// drops to zero. Threads of the same bundle asking while the factory
    /// runs wait for its result instead of calling it again.
    pub(crate) fn get_service(
        &self,
        framework: &CoreContext,
        core: &Arc<RegistrationCore>,
        consumer: &Bundle,
    ) -> Result<InterfaceMapPtr, ServiceError> {
        let cid = consumer.id();
        let current = thread::current().id();
        let (factory, claimed) = {
            let mut state = core.state.lock();
            loop {
                if !state.available {
                    return Err(ServiceError::Unavailable { service_id: core.id });
                }
                let factory = match state.service.clone() {
                    None => return Err(ServiceError::Unavailable { service_id: core.id }),
                    Some(ServiceObject::Instance(map)) => {
                        state.add_dependent(consumer);
                        return Ok(map);
                    }
                    Some(ServiceObject::Factory { factory, .. }) => factory,
                };
                if let Some((_, cached)) = state.bundle_instances.get(&cid).cloned() {
                    state.add_dependent(consumer);
                    return Ok(cached);
                }
                match state.producing.get(&cid) {
                    None => {
                        state.producing.insert(cid, current);
                        break (factory, true);
                    }
                    // A nested call from inside the factory; the recursion
                    // check rejects it.
                    Some(owner) if *owner == current => break (factory, false),
                    Some(_) => core.produced.wait(&mut state),
                }
            }
        };

        let produced = self.call_factory_get(framework, core, consumer, &factory);

        let mut state = core.state.lock();
        if claimed {
            state.producing.remove(&cid);
            core.produced.notify_all();
        }
        let produced = produced?;
        if !state.available {
            drop(state);
            self.call_factory_unget(framework, core, consumer, &factory, &produced, FrameworkEventKind::Error);
            return Err(ServiceError::Unavailable { service_id: core.id });
        }
        state.bundle_instances.insert(cid, (consumer.downgrade(), produced.clone()));
        state.add_dependent(consumer);
        Ok(produced)
    }

    /// Releases one use of the service by `consumer`. With `check_refcount`
    /// false every use is released at once, including prototype instances.
    /// Returns false if the bundle was not using the service.
    pub(crate) fn unget_service(
        &self,
        framework: &CoreContext,
        core: &Arc<RegistrationCore>,
        consumer: &Bundle,
        check_refcount: bool,
    ) -> bool {
        let (factory, instances) = {
            let mut state = core.state.lock();
            let cid = consumer.id();
            let mut released = Vec::new();
            match state.dependents.get_mut(&cid) {
                Some(dep) if check_refcount && dep.count > 1 => {
                    dep.count -= 1;
                    return true;
                }
                Some(_) => {
                    state.dependents.remove(&cid);
                    if let Some((_, instance)) = state.bundle_instances.remove(&cid) {
                        released.push(instance);
                    }
                }
                None if check_refcount => return false,
                None => {}
            }
            if !check_refcount {
                if let Some((_, list)) = state.prototype_instances.remove(&cid) {
                    released.extend(list);
                }
            }
            if released.is_empty() && check_refcount {
                return true;
            }
            let factory = match &state.service {
                Some(ServiceObject::Factory { factory, .. }) => Some(factory.clone()),
                _ => None,
            };
            (factory, released)
        };
        if let Some(factory) = factory {
            for instance in &instances {
                self.call_factory_unget(framework, core, consumer, &factory, instance, FrameworkEventKind::Error);
            }
        }
        true
    }

    /// A fresh instance per call for prototype services; other scopes
    /// behave like [`get_service`](Self::get_service).
    pub(crate) fn get_prototype_service(
        &self,
        framework: &CoreContext,
        core: &Arc<RegistrationCore>,
        consumer: &Bundle,
    ) -> Result<InterfaceMapPtr, ServiceError> {
        if core.scope != ServiceScope::Prototype {
            return self.get_service(framework, core, consumer);
        }
        let factory = {
            let state = core.state.lock();
            match (&state.service, state.available) {
                (Some(ServiceObject::Factory { factory, .. }), true) => factory.clone(),
                _ => return Err(ServiceError::Unavailable { service_id: core.id }),
            }
        };
        let produced = self.call_factory_get(framework, core, consumer, &factory)?;
        let mut state = core.state.lock();
        if !state.available {
            drop(state);
            self.call_factory_unget(framework, core, consumer, &factory, &produced, FrameworkEventKind::Error);
            return Err(ServiceError::Unavailable { service_id: core.id });
        }
        state
            .prototype_instances
            .entry(consumer.id())
            .or_insert_with(|| (consumer.downgrade(), Vec::new()))
            .1
            .push(produced.clone());
        Ok(produced)
    }

    pub(crate) fn unget_prototype_service(
        &self,
        framework: &CoreContext,
        core: &Arc<RegistrationCore>,
        consumer: &Bundle,
        service: &InterfaceMapPtr,
    ) -> Result<(), ServiceError> {
        if core.scope != ServiceScope::Prototype {
            return if self.unget_service(framework, core, consumer, true) {
                Ok(())
            } else {
                Err(ServiceError::IllegalState {
                    service_id: core.id,
                    message: format!("service is not in use by bundle #{}", consumer.id()),
                })
            };
        }
        let factory = {
            let mut state = core.state.lock();
            let not_produced = || {
                ServiceError::InvalidArgument(format!(
                    "service object was not obtained from service #{} by bundle #{}",
                    core.id,
                    consumer.id()
                ))
            };
            let (_, list) = state.prototype_instances.get_mut(&consumer.id()).ok_or_else(not_produced)?;
            let pos = list.iter().position(|inst| Arc::ptr_eq(inst, service)).ok_or_else(not_produced)?;
            list.remove(pos);
            if list.is_empty() {
                state.prototype_instances.remove(&consumer.id());
            }
            match &state.service {
                Some(ServiceObject::Factory { factory, .. }) => Some(factory.clone()),
                _ => None,
            }
        };
        if let Some(factory) = factory {
            self.call_factory_unget(framework, core, consumer, &factory, service, FrameworkEventKind::Error);
        }
        Ok(())
    }

    pub(crate) fn unregister(&self, framework: &CoreContext, core: &Arc<RegistrationCore>) -> Result<(), ServiceError> {
        {
            let mut state = core.state.lock();
            if state.unregistering {
                return Ok(());
            }
            if state.service.is_none() {
                return Err(ServiceError::IllegalState {
                    service_id: core.id,
                    message: "service has already been unregistered".to_string(),
                });
            }
            state.unregistering = true;
        }
        self.remove_service_registration(core);

        let reference = ServiceReference::new(core, framework.weak(), None);
        let receivers = framework.listeners().matching_service_listeners(&core.properties.lock());
        let event = ServiceEvent::new(ServiceEventKind::Unregistering, reference);
        framework.listeners().service_changed(framework, &receivers, &event, None);

        let (factory, instances) = {
            let mut state = core.state.lock();
            state.available = false;
            state.dependents.clear();
            let mut instances: Vec<(WeakBundle, InterfaceMapPtr)> = state.bundle_instances.drain().map(|(_, v)| v).collect();
            for (_, (bundle, list)) in state.prototype_instances.drain() {
                instances.extend(list.into_iter().map(|inst| (bundle.clone(), inst)));
            }
            let factory = match &state.service {
                Some(ServiceObject::Factory { factory, .. }) => Some(factory.clone()),
                _ => None,
            };
            (factory, instances)
        };
        if let Some(factory) = factory {
            for (bundle, instance) in &instances {
                if let Some(consumer) = bundle.upgrade() {
                    self.call_factory_unget(framework, core, &consumer, &factory, instance, FrameworkEventKind::Warning);
                }
            }
        }
        {
            let mut state = core.state.lock();
            state.service = None;
            state.unregistering = false;
        }
        self.slots.write().remove(&core.id);
        log::debug!(target: "lattice::service", "Service #{} unregistered", core.id);
        Ok(())
    }

    pub(crate) fn set_properties(
        &self,
        framework: &CoreContext,
        core: &Arc<RegistrationCore>,
        properties: Properties,
    ) -> Result<(), ServiceError> {
        {
            let state = core.state.lock();
            if !state.available || state.unregistering {
                return Err(ServiceError::IllegalState {
                    service_id: core.id,
                    message: "service has been unregistered".to_string(),
                });
            }
        }
        let new_ranking = ranking_of(&properties)?;
        let before = framework.listeners().matching_service_listeners(&core.properties.lock());

        let mut props = properties;
        core.properties.update(|current| {
            for key in [OBJECTCLASS, SERVICE_ID, SERVICE_SCOPE] {
                props.remove(key);
                let value = current.get(key).cloned().unwrap_or(Value::Null);
                props.insert(key, value);
            }
            *current = props;
        });
        let old_ranking = core.ranking.swap(new_ranking, Ordering::AcqRel);
        if old_ranking != new_ranking {
            self.update_service_registration_order(core);
        }

        let reference = ServiceReference::new(core, framework.weak(), None);
        let receivers = framework.listeners().matching_service_listeners(&core.properties.lock());
        let event = ServiceEvent::new(ServiceEventKind::Modified, reference);
        framework.listeners().service_changed(framework, &receivers, &event, Some(before));
        Ok(())
    }
}
