//! Listener tables and synchronous event delivery.
//!
//! Framework listeners are keyed by the owning bundle id and survive that
//! bundle's stop/start; they go away on explicit removal, when the bundle
//! is uninstalled, or when the framework stops. Bundle and service
//! listeners are keyed by the bundle context they were added through and
//! are dropped when that context is invalidated.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use crate::bundle::{BundleContext, BundleId, BundleState, ContextId, WeakBundle};
use crate::event::{
    BundleEvent, BundleListener, Event, FrameworkEvent, FrameworkListener, ListenerError, ListenerIdentity,
    ListenerToken, ServiceEvent, ServiceEventKind, ServiceListener,
};
use crate::filter::Filter;
use crate::kernel::constants::HASHED_KEYS;
use crate::kernel::context::CoreContext;
use crate::kernel::diagnostics::DiagnosticLog;
use crate::kernel::guard::guarded;
use crate::properties::Properties;

/// Per-key listener table with a secondary index for legacy identity
/// removal. Several listeners may share an identity; removal by identity
/// takes the oldest first.
struct ListenerTable<K, E> {
    entries: BTreeMap<K, BTreeMap<ListenerToken, (Option<ListenerIdentity>, E)>>,
    identities: HashMap<(K, ListenerIdentity), BTreeSet<ListenerToken>>,
}

impl<K: Ord + Hash + Copy, E: Clone> ListenerTable<K, E> {
    fn new() -> Self {
        Self { entries: BTreeMap::new(), identities: HashMap::new() }
    }

    fn insert(&mut self, key: K, token: ListenerToken, identity: Option<ListenerIdentity>, entry: E) {
        if let Some(identity) = identity {
            self.identities.entry((key, identity)).or_default().insert(token);
        }
        self.entries.entry(key).or_default().insert(token, (identity, entry));
    }

    fn remove(&mut self, key: K, token: ListenerToken) -> bool {
        let Some(tokens) = self.entries.get_mut(&key) else {
            return false;
        };
        let Some((identity, _)) = tokens.remove(&token) else {
            return false;
        };
        if tokens.is_empty() {
            self.entries.remove(&key);
        }
        if let Some(identity) = identity {
            self.forget_identity(key, identity, token);
        }
        true
    }

    fn forget_identity(&mut self, key: K, identity: ListenerIdentity, token: ListenerToken) {
        if let Some(tokens) = self.identities.get_mut(&(key, identity)) {
            tokens.remove(&token);
            if tokens.is_empty() {
                self.identities.remove(&(key, identity));
            }
        }
    }

    fn remove_identity(&mut self, key: K, identity: ListenerIdentity) -> bool {
        let oldest = self.identities.get(&(key, identity)).and_then(|tokens| tokens.first().copied());
        match oldest {
            Some(token) => self.remove(key, token),
            None => false,
        }
    }

    fn remove_key(&mut self, key: K) -> usize {
        let removed = self.entries.remove(&key).unwrap_or_default();
        for (token, (identity, _)) in &removed {
            if let Some(identity) = identity {
                self.forget_identity(key, *identity, *token);
            }
        }
        removed.len()
    }

    fn snapshot(&self) -> Vec<(ListenerToken, E)> {
        self.entries
            .values()
            .flat_map(|tokens| tokens.iter().map(|(token, (_, entry))| (*token, entry.clone())))
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.identities.clear();
    }
}

#[derive(Clone)]
struct FrameworkEntry {
    bundle: WeakBundle,
    listener: FrameworkListener,
}

#[derive(Clone)]
struct BundleEntry {
    context: BundleContext,
    listener: BundleListener,
}

/// A registered service listener.
pub struct ServiceListenerEntry {
    token: ListenerToken,
    context: BundleContext,
    listener: ServiceListener,
    filter: Option<Filter>,
    identity: Option<ListenerIdentity>,
    /// Literal values per hashed key when the filter qualifies for indexing.
    hashed: Option<Vec<Vec<String>>>,
}

impl ServiceListenerEntry {
    pub fn token(&self) -> ListenerToken {
        self.token
    }

    pub fn context(&self) -> &BundleContext {
        &self.context
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    fn matches(&self, props: &Properties) -> bool {
        match &self.filter {
            Some(filter) => filter.evaluate(props, false),
            None => true,
        }
    }
}

impl fmt::Debug for ServiceListenerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceListenerEntry")
            .field("token", &self.token)
            .field("context", &self.context.id())
            .field("filter", &self.filter.as_ref().map(|flt| flt.expression()))
            .field("hashed", &self.hashed.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct ServiceTable {
    entries: BTreeMap<ListenerToken, Arc<ServiceListenerEntry>>,
    by_context: HashMap<ContextId, BTreeSet<ListenerToken>>,
    identities: HashMap<(ContextId, ListenerIdentity), ListenerToken>,
    /// Listeners that must be evaluated against every event.
    complicated: BTreeSet<ListenerToken>,
    /// One value index per entry of [`HASHED_KEYS`].
    hashed: [HashMap<String, BTreeSet<ListenerToken>>; HASHED_KEYS.len()],
}

impl ServiceTable {
    fn insert(&mut self, entry: Arc<ServiceListenerEntry>) {
        let token = entry.token;
        let context_id = entry.context.id();
        match &entry.hashed {
            Some(terms) => {
                for (index, values) in terms.iter().enumerate() {
                    for value in values {
                        self.hashed[index].entry(value.clone()).or_default().insert(token);
                    }
                }
            }
            None => {
                self.complicated.insert(token);
            }
        }
        if let Some(identity) = entry.identity {
            self.identities.insert((context_id, identity), token);
        }
        self.by_context.entry(context_id).or_default().insert(token);
        self.entries.insert(token, entry);
    }

    fn remove(&mut self, token: ListenerToken) -> Option<Arc<ServiceListenerEntry>> {
        let entry = self.entries.remove(&token)?;
        let context_id = entry.context.id();
        self.complicated.remove(&token);
        if let Some(terms) = &entry.hashed {
            for (index, values) in terms.iter().enumerate() {
                for value in values {
                    if let Some(tokens) = self.hashed[index].get_mut(value) {
                        tokens.remove(&token);
                        if tokens.is_empty() {
                            self.hashed[index].remove(value);
                        }
                    }
                }
            }
        }
        if let Some(identity) = entry.identity {
            self.identities.remove(&(context_id, identity));
        }
        if let Some(tokens) = self.by_context.get_mut(&context_id) {
            tokens.remove(&token);
            if tokens.is_empty() {
                self.by_context.remove(&context_id);
            }
        }
        Some(entry)
    }

    fn owned_by(&self, context_id: ContextId, token: ListenerToken) -> bool {
        self.by_context.get(&context_id).is_some_and(|tokens| tokens.contains(&token))
    }
}

/// Values of a hashed key as the strings used by the value index.
fn hashed_values(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => vec![(f as i64).to_string(), n.to_string()],
            _ => vec![n.to_string()],
        },
        Value::Bool(b) => vec![b.to_string()],
        Value::Array(items) => items.iter().flat_map(hashed_values).collect(),
        Value::Null | Value::Object(_) => Vec::new(),
    }
}

/// The framework, bundle and service listener tables.
pub struct ListenerRegistry {
    next_token: AtomicU64,
    framework: Mutex<ListenerTable<BundleId, FrameworkEntry>>,
    bundle: Mutex<ListenerTable<ContextId, BundleEntry>>,
    service: Mutex<ServiceTable>,
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("framework_listeners", &self.framework_listener_count())
            .field("bundle_listeners", &self.bundle_listener_count())
            .field("service_listeners", &self.service_listener_count())
            .finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            next_token: AtomicU64::new(1),
            framework: Mutex::new(ListenerTable::new()),
            bundle: Mutex::new(ListenerTable::new()),
            service: Mutex::new(ServiceTable::default()),
        }
    }

    fn next_token(&self) -> ListenerToken {
        ListenerToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    pub fn add_framework_listener(
        &self,
        context: &BundleContext,
        listener: FrameworkListener,
        identity: Option<ListenerIdentity>,
    ) -> ListenerToken {
        let token = self.next_token();
        let entry = FrameworkEntry { bundle: context.weak_bundle(), listener };
        self.framework.lock().insert(context.bundle_id(), token, identity, entry);
        token
    }

    pub fn add_bundle_listener(
        &self,
        context: &BundleContext,
        listener: BundleListener,
        identity: Option<ListenerIdentity>,
    ) -> ListenerToken {
        let token = self.next_token();
        let entry = BundleEntry { context: context.clone(), listener };
        self.bundle.lock().insert(context.id(), token, identity, entry);
        token
    }

    /// Adds a service listener. A listener added with an identity replaces
    /// any earlier listener of the same context registered with that identity.
    pub fn add_service_listener(
        &self,
        context: &BundleContext,
        listener: ServiceListener,
        identity: Option<ListenerIdentity>,
        filter: Option<Filter>,
    ) -> ListenerToken {
        let token = self.next_token();
        let hashed = filter.as_ref().and_then(|flt| flt.simple_terms(&HASHED_KEYS));
        let entry = Arc::new(ServiceListenerEntry {
            token,
            context: context.clone(),
            listener,
            filter,
            identity,
            hashed,
        });
        let mut table = self.service.lock();
        if let Some(identity) = identity {
            if let Some(previous) = table.identities.get(&(context.id(), identity)).copied() {
                table.remove(previous);
                log::debug!(target: "lattice::event", "Replaced service listener {} with {}", previous, token);
            }
        }
        table.insert(entry);
        token
    }

    /// Removes a listener by token. Framework listeners are found through
    /// any context of the owning bundle; bundle and service listeners only
    /// through the context that added them.
    pub fn remove_listener(&self, context: &BundleContext, token: ListenerToken) -> bool {
        if self.framework.lock().remove(context.bundle_id(), token) {
            return true;
        }
        if self.bundle.lock().remove(context.id(), token) {
            return true;
        }
        let mut table = self.service.lock();
        if table.owned_by(context.id(), token) {
            return table.remove(token).is_some();
        }
        false
    }

    pub fn remove_framework_listener(&self, context: &BundleContext, identity: ListenerIdentity) -> bool {
        self.framework.lock().remove_identity(context.bundle_id(), identity)
    }

    pub fn remove_bundle_listener(&self, context: &BundleContext, identity: ListenerIdentity) -> bool {
        self.bundle.lock().remove_identity(context.id(), identity)
    }

    pub fn remove_service_listener(&self, context: &BundleContext, identity: ListenerIdentity) -> bool {
        let mut table = self.service.lock();
        match table.identities.get(&(context.id(), identity)).copied() {
            Some(token) => table.remove(token).is_some(),
            None => false,
        }
    }

    /// Drops the bundle and service listeners added through `context`.
    pub fn remove_all_listeners(&self, context: &BundleContext) {
        let bundle_count = self.bundle.lock().remove_key(context.id());
        let mut table = self.service.lock();
        let tokens: Vec<ListenerToken> =
            table.by_context.get(&context.id()).map(|t| t.iter().copied().collect()).unwrap_or_default();
        for token in &tokens {
            table.remove(*token);
        }
        if bundle_count + tokens.len() > 0 {
            log::debug!(
                target: "lattice::event",
                "Removed {} bundle and {} service listeners of context {:?}",
                bundle_count,
                tokens.len(),
                context.id()
            );
        }
    }

    pub fn remove_framework_listeners(&self, bundle_id: BundleId) -> usize {
        self.framework.lock().remove_key(bundle_id)
    }

    pub fn clear(&self) {
        self.framework.lock().clear();
        self.bundle.lock().clear();
        *self.service.lock() = ServiceTable::default();
    }

    pub fn framework_listener_count(&self) -> usize {
        self.framework.lock().len()
    }

    pub fn bundle_listener_count(&self) -> usize {
        self.bundle.lock().len()
    }

    pub fn service_listener_count(&self) -> usize {
        self.service.lock().entries.len()
    }

    /// Delivers a framework event. A failing framework listener is written
    /// to the diagnostic log and never turned into another event.
    pub fn framework_event(&self, diagnostics: &DiagnosticLog, event: &FrameworkEvent) {
        let snapshot = self.framework.lock().snapshot();
        log::trace!(target: "lattice::event", "Delivering {} to {} listeners", event.name(), snapshot.len());
        for (token, entry) in snapshot {
            let owner = entry.bundle.upgrade();
            if owner.as_ref().is_none_or(|b| b.state() == BundleState::Uninstalled) {
                continue;
            }
            if let Err(err) = guarded(|| (entry.listener)(event)) {
                let bundle_id = owner.map(|b| b.id()).unwrap_or_default();
                diagnostics.record(format!(
                    "Framework listener {} of bundle #{} failed while handling '{}': {}",
                    token,
                    bundle_id,
                    event.name(),
                    err
                ));
            }
        }
    }

    /// Delivers a bundle event to every bundle listener with a valid context.
    pub fn bundle_changed(&self, core: &CoreContext, event: &BundleEvent) {
        let snapshot = self.bundle.lock().snapshot();
        log::trace!(target: "lattice::event", "Delivering {} for bundle #{}", event.name(), event.bundle().id());
        for (token, entry) in snapshot {
            if !entry.context.is_valid() {
                continue;
            }
            if let Err(source) = guarded(|| (entry.listener)(event)) {
                let error = ListenerError::CallbackFailed { kind: "Bundle", token, event: event.name(), source };
                core.listener_failed(&entry.context, error);
            }
        }
    }

    /// Service listeners whose filter matches `props`, in token order.
    ///
    /// The value index only narrows the candidates; every candidate's
    /// filter is still evaluated.
    pub fn matching_service_listeners(&self, props: &Properties) -> Vec<Arc<ServiceListenerEntry>> {
        let (indexed, complicated) = {
            let table = self.service.lock();
            let mut tokens = BTreeSet::new();
            for (index, key) in HASHED_KEYS.iter().enumerate() {
                let Some(value) = props.get(key) else {
                    continue;
                };
                for literal in hashed_values(value) {
                    if let Some(found) = table.hashed[index].get(&literal) {
                        tokens.extend(found.iter().copied());
                    }
                }
            }
            let indexed: Vec<_> = tokens.iter().filter_map(|t| table.entries.get(t).cloned()).collect();
            let complicated: Vec<_> = table.complicated.iter().filter_map(|t| table.entries.get(t).cloned()).collect();
            (indexed, complicated)
        };
        let mut matched: Vec<_> =
            indexed.into_iter().chain(complicated).filter(|entry| entry.matches(props)).collect();
        matched.sort_by_key(|entry| entry.token);
        matched
    }

    /// Delivers a service event to `receivers`.
    ///
    /// When `before` is given (a MODIFIED event), listeners that matched
    /// before the change but are not receivers now get MODIFIED_ENDMATCH.
    pub fn service_changed(
        &self,
        core: &CoreContext,
        receivers: &[Arc<ServiceListenerEntry>],
        event: &ServiceEvent,
        before: Option<Vec<Arc<ServiceListenerEntry>>>,
    ) {
        let mut end_match: BTreeMap<ListenerToken, Arc<ServiceListenerEntry>> =
            before.unwrap_or_default().into_iter().map(|entry| (entry.token, entry)).collect();
        for entry in receivers {
            end_match.remove(&entry.token);
            self.deliver_service_event(core, entry, event);
        }
        if end_match.is_empty() {
            return;
        }
        let ended = ServiceEvent::new(ServiceEventKind::ModifiedEndMatch, event.reference().clone());
        for entry in end_match.values() {
            self.deliver_service_event(core, entry, &ended);
        }
    }

    fn deliver_service_event(&self, core: &CoreContext, entry: &ServiceListenerEntry, event: &ServiceEvent) {
        if !entry.context.is_valid() {
            return;
        }
        if !self.service.lock().entries.contains_key(&entry.token) {
            // Removed after the snapshot was taken.
            return;
        }
        if let Err(source) = guarded(|| (entry.listener)(event)) {
            let error = ListenerError::CallbackFailed { kind: "Service", token: entry.token, event: event.name(), source };
            core.listener_failed(&entry.context, error);
        }
    }
}
