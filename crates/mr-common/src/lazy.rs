//! Memoized attribute access for remote API objects.
//!
//! Attributes of a remote object can be expensive to resolve (each may be
//! a round-trip). `Lazy` resolves each attribute on first access and keeps
//! the value for the lifetime of the wrapper. Missing attributes are not
//! cached, so a later lookup retries.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Something that can resolve named attributes
pub trait AttributeSource {
    type Value: Clone;

    fn attribute(&self, name: &str) -> Option<Self::Value>;
}

impl AttributeSource for serde_json::Value {
    type Value = serde_json::Value;

    fn attribute(&self, name: &str) -> Option<serde_json::Value> {
        self.get(name).cloned()
    }
}

pub struct Lazy<R: AttributeSource> {
    real: R,
    resolved: Mutex<HashMap<String, R::Value>>,
}

impl<R: AttributeSource> Lazy<R> {
    pub fn new(real: R) -> Self {
        Self {
            real,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Option<R::Value> {
        if let Some(value) = self.resolved.lock().get(name) {
            return Some(value.clone());
        }

        let value = self.real.attribute(name)?;
        let mut resolved = self.resolved.lock();
        Some(resolved.entry(name.to_string()).or_insert(value).clone())
    }

    pub fn is_resolved(&self, name: &str) -> bool {
        self.resolved.lock().contains_key(name)
    }

    pub fn inner(&self) -> &R {
        &self.real
    }

    pub fn into_inner(self) -> R {
        self.real
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSource {
        lookups: AtomicU32,
    }

    impl AttributeSource for CountingSource {
        type Value = String;

        fn attribute(&self, name: &str) -> Option<String> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            match name {
                "title" => Some("Spring newsletter".to_string()),
                _ => None,
            }
        }
    }

    #[test]
    fn test_attribute_resolved_once() {
        let lazy = Lazy::new(CountingSource {
            lookups: AtomicU32::new(0),
        });

        assert!(!lazy.is_resolved("title"));
        assert_eq!(lazy.get("title").as_deref(), Some("Spring newsletter"));
        assert_eq!(lazy.get("title").as_deref(), Some("Spring newsletter"));
        assert!(lazy.is_resolved("title"));
        assert_eq!(lazy.inner().lookups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_attribute_not_cached() {
        let lazy = Lazy::new(CountingSource {
            lookups: AtomicU32::new(0),
        });

        assert!(lazy.get("missing").is_none());
        assert!(lazy.get("missing").is_none());
        assert_eq!(lazy.inner().lookups.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_json_object_source() {
        let lazy = Lazy::new(serde_json::json!({ "id": "camp123", "emails_sent": 42 }));
        assert_eq!(lazy.get("emails_sent"), Some(serde_json::json!(42)));
        assert!(lazy.get("nope").is_none());
    }
}
