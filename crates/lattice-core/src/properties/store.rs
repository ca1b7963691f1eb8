use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;

use parking_lot::{RwLock, RwLockReadGuard};
use serde_json::Value;

use crate::properties::PropertyError;

/// Ordered, case-insensitive property dictionary.
#[derive(Clone, Default, PartialEq)]
pub struct Properties {
    keys: Vec<String>,
    values: Vec<Value>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a dictionary from key/value pairs.
    ///
    /// Fails when two keys differ only by case, since a case-insensitive
    /// lookup could not tell them apart.
    pub fn from_pairs<I, K>(pairs: I) -> Result<Self, PropertyError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut props = Properties::new();
        for (key, value) in pairs {
            let key = key.into();
            if let Some(existing) = props.position(&key, false) {
                return Err(PropertyError::CaseVariantKeys {
                    first: props.keys[existing].clone(),
                    second: key,
                });
            }
            props.keys.push(key);
            props.values.push(value);
        }
        Ok(props)
    }

    pub fn from_map(map: HashMap<String, Value>) -> Result<Self, PropertyError> {
        let mut pairs: Vec<(String, Value)> = map.into_iter().collect();
        // HashMap order is random; sort so that error messages are stable.
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        Self::from_pairs(pairs)
    }

    /// Builds a dictionary from a JSON object. Non-object values yield an
    /// empty dictionary.
    pub fn from_json(value: &Value) -> Result<Self, PropertyError> {
        match value {
            Value::Object(map) => Self::from_pairs(map.iter().map(|(k, v)| (k.clone(), v.clone()))),
            _ => Ok(Self::new()),
        }
    }

    fn position(&self, key: &str, match_case: bool) -> Option<usize> {
        if let Some(idx) = self.keys.iter().position(|k| k == key) {
            return Some(idx);
        }
        if match_case {
            return None;
        }
        self.keys.iter().position(|k| k.eq_ignore_ascii_case(key))
    }

    /// Case-insensitive lookup; an exact spelling match wins.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.value(key, false)
    }

    pub fn value(&self, key: &str, match_case: bool) -> Option<&Value> {
        self.position(key, match_case).map(|idx| &self.values[idx])
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key, false).is_some()
    }

    /// Inserts or replaces a value. A key that matches an existing one
    /// ignoring case replaces it and takes over the new spelling.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        match self.position(&key, false) {
            Some(idx) => {
                self.keys[idx] = key;
                Some(std::mem::replace(&mut self.values[idx], value))
            }
            None => {
                self.keys.push(key);
                self.values.push(value);
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.position(key, false)?;
        self.keys.remove(idx);
        Some(self.values.remove(idx))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.keys.iter().map(String::as_str).zip(self.values.iter())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn to_map(&self) -> HashMap<String, Value> {
        self.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }
}

impl fmt::Debug for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// A property dictionary guarded by its own lock.
#[derive(Default)]
pub struct SharedProperties {
    inner: RwLock<Properties>,
}

impl SharedProperties {
    pub fn new(props: Properties) -> Self {
        Self { inner: RwLock::new(props) }
    }

    /// Returns a read handle. The lock is released when the handle drops.
    pub fn lock(&self) -> PropertiesHandle<'_> {
        PropertiesHandle { guard: self.inner.read() }
    }

    /// Swaps in a whole new dictionary and returns the previous one.
    pub fn replace(&self, props: Properties) -> Properties {
        std::mem::replace(&mut *self.inner.write(), props)
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut Properties) -> R) -> R {
        f(&mut self.inner.write())
    }

    pub fn snapshot(&self) -> Properties {
        self.inner.read().clone()
    }
}

impl fmt::Debug for SharedProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedProperties").field(&*self.inner.read()).finish()
    }
}

/// RAII read access to a [`SharedProperties`].
pub struct PropertiesHandle<'a> {
    guard: RwLockReadGuard<'a, Properties>,
}

impl Deref for PropertiesHandle<'_> {
    type Target = Properties;

    fn deref(&self) -> &Properties {
        &self.guard
    }
}
