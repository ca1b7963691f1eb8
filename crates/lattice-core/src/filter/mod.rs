//! # Lattice Core Filters
//!
//! Boolean predicates over a [`Properties`] dictionary. Service lookups and
//! service listeners accept any [`FilterPredicate`]; [`LdapFilter`] is the
//! stock RFC 1960 implementation and [`FnFilter`] adapts a closure.
//!
//! ## Key Submodules
//! - `ldap`: parser and evaluator for LDAP-style filter strings.
//! - `error`: [`FilterError`], raised on malformed filter strings.

pub mod error;
pub mod ldap;

use std::fmt;
use std::sync::Arc;

use crate::properties::Properties;

pub use error::FilterError;
pub use ldap::LdapFilter;

/// Shared handle to a predicate, as stored by listeners and lookups.
pub type Filter = Arc<dyn FilterPredicate>;

/// A boolean predicate over a property dictionary.
pub trait FilterPredicate: Send + Sync + fmt::Debug {
    /// Evaluates the predicate. `match_case` controls whether property
    /// *keys* are looked up case-sensitively.
    fn evaluate(&self, props: &Properties, match_case: bool) -> bool;

    /// Human-readable form of the predicate.
    fn expression(&self) -> String;

    /// When the predicate only ever matches exact literal values of the
    /// given keys, returns those literals per key (same order as `keys`).
    ///
    /// Listener indexing uses this to pick candidate listeners, which are
    /// then evaluated as usual. A literal must match a property value
    /// exactly when its string form does. `None` means the predicate is a
    /// candidate for every event.
    fn simple_terms(&self, keys: &[&str]) -> Option<Vec<Vec<String>>> {
        let _ = keys;
        None
    }
}

/// Adapts a closure into a [`FilterPredicate`].
pub struct FnFilter<F> {
    description: String,
    predicate: F,
}

impl<F> FnFilter<F>
where
    F: Fn(&Properties) -> bool + Send + Sync + 'static,
{
    pub fn new(description: impl Into<String>, predicate: F) -> Self {
        Self { description: description.into(), predicate }
    }

    pub fn shared(description: impl Into<String>, predicate: F) -> Filter {
        Arc::new(Self::new(description, predicate))
    }
}

impl<F> fmt::Debug for FnFilter<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFilter").field("description", &self.description).finish_non_exhaustive()
    }
}

impl<F> FilterPredicate for FnFilter<F>
where
    F: Fn(&Properties) -> bool + Send + Sync + 'static,
{
    fn evaluate(&self, props: &Properties, _match_case: bool) -> bool {
        (self.predicate)(props)
    }

    fn expression(&self) -> String {
        self.description.clone()
    }
}

/// Parses an LDAP filter string into a shared predicate.
pub fn ldap(expression: &str) -> Result<Filter, FilterError> {
    Ok(Arc::new(LdapFilter::parse(expression)?))
}

#[cfg(test)]
mod tests;
