use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::bundle::Bundle;
use crate::event::FrameworkEventKind;
use crate::filter::Filter;
use crate::kernel::context::CoreContext;
use crate::kernel::guard::{BoxError, guarded};
use crate::service::ServiceReference;

/// Identifies an installed hook so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId(u64);

/// Inspects service lookups before the result reaches the caller.
///
/// A hook may remove references from `references`; anything it adds is
/// ignored.
pub trait FindHook: Send + Sync {
    fn find(
        &self,
        requester: &Bundle,
        class: Option<&str>,
        filter: Option<&str>,
        references: &mut Vec<ServiceReference>,
    ) -> Result<(), BoxError>;
}

/// Find hooks installed on a framework instance.
#[derive(Default)]
pub struct ServiceHooks {
    hooks: RwLock<Vec<(HookId, Arc<dyn FindHook>)>>,
    next_id: AtomicU64,
}

impl fmt::Debug for ServiceHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHooks").field("find_hooks", &self.hooks.read().len()).finish()
    }
}

impl ServiceHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_find_hook(&self, hook: Arc<dyn FindHook>) -> HookId {
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.hooks.write().push((id, hook));
        id
    }

    pub fn remove_find_hook(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.write();
        let before = hooks.len();
        hooks.retain(|(hid, _)| *hid != id);
        hooks.len() != before
    }

    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.read().is_empty()
    }

    /// Runs every hook over `references`. Each hook works on a copy; only
    /// the entries it kept that were already present survive.
    pub(crate) fn filter_find(
        &self,
        framework: &CoreContext,
        requester: &Bundle,
        class: Option<&str>,
        filter: Option<&Filter>,
        references: &mut Vec<ServiceReference>,
    ) {
        let hooks: Vec<_> = self.hooks.read().clone();
        if hooks.is_empty() {
            return;
        }
        let expression = filter.map(|flt| flt.expression());
        for (id, hook) in hooks {
            let mut candidate = references.clone();
            match guarded(|| hook.find(requester, class, expression.as_deref(), &mut candidate)) {
                Ok(()) => references.retain(|reference| candidate.contains(reference)),
                Err(err) => framework.report(
                    FrameworkEventKind::Warning,
                    Some(requester.clone()),
                    format!("Find hook {:?} failed", id),
                    Some(err),
                ),
            }
        }
    }
}
