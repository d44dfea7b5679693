//! Limit definitions and their identifiers.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::error::{Result, TollgateError};

/// Opaque identifier of one registered limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LimiterId(Uuid);

impl LimiterId {
    /// Generate a fresh, random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LimiterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LimiterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single fixed-window limit: `max_requests` per `window`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitDefinition {
    /// Identifier under which this limit was registered
    pub id: LimiterId,
    /// Requests allowed per window
    pub max_requests: u64,
    /// Length of one window
    pub window: Duration,
    /// Optional label, only used in logs
    pub name: Option<String>,
}

impl LimitDefinition {
    /// Create a validated limit definition with a fresh identifier.
    pub fn new(max_requests: u64, window: Duration) -> Result<Self> {
        if max_requests == 0 {
            return Err(TollgateError::InvalidLimit(
                "max_requests must be greater than 0".into(),
            ));
        }
        if window.is_zero() {
            return Err(TollgateError::InvalidLimit(
                "window must be greater than 0".into(),
            ));
        }
        Ok(Self {
            id: LimiterId::new(),
            max_requests,
            window,
            name: None,
        })
    }

    /// Attach a label to this definition.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// A readable label for logs: the name if set, the id otherwise.
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }
}

/// Immutable set of limit definitions, in registration order.
#[derive(Debug, Clone, Default)]
pub struct LimitRegistry {
    order: Vec<LimiterId>,
    limits: HashMap<LimiterId, LimitDefinition>,
}

impl LimitRegistry {
    /// Build a registry from definitions. Order is preserved.
    pub fn new(definitions: impl IntoIterator<Item = LimitDefinition>) -> Self {
        let mut registry = Self::default();
        for definition in definitions {
            if registry.limits.contains_key(&definition.id) {
                continue;
            }
            registry.order.push(definition.id);
            registry.limits.insert(definition.id, definition);
        }
        registry
    }

    /// Look up a definition, failing loudly for unknown ids.
    pub fn get(&self, id: LimiterId) -> Result<&LimitDefinition> {
        self.limits
            .get(&id)
            .ok_or(TollgateError::UnknownLimiter(id))
    }

    /// Whether `id` was registered.
    pub fn contains(&self, id: LimiterId) -> bool {
        self.limits.contains_key(&id)
    }

    /// Definitions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &LimitDefinition> {
        self.order.iter().filter_map(|id| self.limits.get(id))
    }

    /// Number of registered limits.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no limits are registered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_rejects_zero_requests() {
        let result = LimitDefinition::new(0, Duration::from_secs(60));
        assert!(matches!(result, Err(TollgateError::InvalidLimit(_))));
    }

    #[test]
    fn test_definition_rejects_zero_window() {
        let result = LimitDefinition::new(10, Duration::ZERO);
        assert!(matches!(result, Err(TollgateError::InvalidLimit(_))));
    }

    #[test]
    fn test_definition_label() {
        let definition = LimitDefinition::new(10, Duration::from_secs(60)).unwrap();
        assert_eq!(definition.label(), definition.id.to_string());

        let named = definition.with_name("per-host");
        assert_eq!(named.label(), "per-host");
    }

    #[test]
    fn test_registry_preserves_order() {
        let a = LimitDefinition::new(1, Duration::from_secs(1)).unwrap();
        let b = LimitDefinition::new(2, Duration::from_secs(2)).unwrap();
        let c = LimitDefinition::new(3, Duration::from_secs(3)).unwrap();
        let ids = vec![a.id, b.id, c.id];

        let registry = LimitRegistry::new(vec![a, b, c]);

        let seen: Vec<LimiterId> = registry.iter().map(|d| d.id).collect();
        assert_eq!(seen, ids);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_registry_unknown_id() {
        let registry = LimitRegistry::new(Vec::new());
        let id = LimiterId::new();

        assert!(registry.is_empty());
        assert!(!registry.contains(id));
        match registry.get(id) {
            Err(TollgateError::UnknownLimiter(missing)) => assert_eq!(missing, id),
            other => panic!("expected UnknownLimiter, got {:?}", other),
        }
    }
}
