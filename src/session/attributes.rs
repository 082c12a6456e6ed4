//! Session attributes

use std::any::Any;
use std::sync::Arc;

use super::{lock, Session};

/// A value stored in a session's attribute map.
pub type AttributeValue = Arc<dyn Any + Send + Sync>;

impl Session {
    /// Store `value` under `key`, returning the previous value.
    pub fn set_attribute(
        &self,
        key: impl Into<String>,
        value: AttributeValue,
    ) -> Option<AttributeValue> {
        lock(&self.attributes).insert(key.into(), value)
    }

    pub fn attribute(&self, key: &str) -> Option<AttributeValue> {
        lock(&self.attributes).get(key).cloned()
    }

    /// The value under `key` if it is a `T`.
    pub fn attribute_as<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.attribute(key)?.downcast::<T>().ok()
    }

    pub fn remove_attribute(&self, key: &str) -> Option<AttributeValue> {
        lock(&self.attributes).remove(key)
    }

    /// Remove the value under `key` only if `predicate` accepts it. The check
    /// and the removal happen under one lock.
    pub fn remove_attribute_if<F>(&self, key: &str, predicate: F) -> bool
    where
        F: FnOnce(&AttributeValue) -> bool,
    {
        let mut attributes = lock(&self.attributes);
        match attributes.get(key) {
            Some(value) if predicate(value) => {
                attributes.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn contains_attribute(&self, key: &str) -> bool {
        lock(&self.attributes).contains_key(key)
    }

    /// The value under `key`, inserting the one produced by `init` if absent.
    pub fn attribute_or_insert_with<F>(&self, key: &str, init: F) -> AttributeValue
    where
        F: FnOnce() -> AttributeValue,
    {
        lock(&self.attributes)
            .entry(key.to_string())
            .or_insert_with(init)
            .clone()
    }

    pub fn attribute_keys(&self) -> Vec<String> {
        lock(&self.attributes).keys().cloned().collect()
    }
}
