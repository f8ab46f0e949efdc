//! Port descriptors and filters.
//!
//! The helper reports ports as flat JSON objects whose field set is up to the
//! platform enumerator (path, vendor and product ids, serial number...). A
//! [`PortFilter`] is an object of exact-match key/value pairs. A port matches
//! a [`PortFilters`] list only if it matches every filter in it.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// PortDescriptor
// ============================================================================

/// One port as reported by the `SerialPorts` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortDescriptor(Map<String, Value>);

impl PortDescriptor {
    /// Creates an empty descriptor.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field.
    #[inline]
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns a field value.
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns a string field value.
    #[inline]
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Returns all fields.
    #[inline]
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for PortDescriptor {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

// ============================================================================
// PortFilter
// ============================================================================

/// Exact-match constraints on descriptor fields.
///
/// An empty filter matches every port.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortFilter(Map<String, Value>);

impl PortFilter {
    /// Creates an empty filter.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `key` to equal `value`.
    #[inline]
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns `true` if every constraint equals the port's field.
    ///
    /// A field missing from the port never matches.
    #[must_use]
    pub fn matches(&self, port: &PortDescriptor) -> bool {
        self.0
            .iter()
            .all(|(key, expected)| port.get(key) == Some(expected))
    }
}

impl From<Map<String, Value>> for PortFilter {
    fn from(constraints: Map<String, Value>) -> Self {
        Self(constraints)
    }
}

// ============================================================================
// PortFilters
// ============================================================================

/// A normalized list of filters, combined with AND.
///
/// Built from nothing, a single filter, or a list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortFilters(Vec<PortFilter>);

impl PortFilters {
    /// No filtering.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Returns `true` if no filters are set.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` if the port satisfies every filter.
    #[inline]
    #[must_use]
    pub fn matches(&self, port: &PortDescriptor) -> bool {
        self.0.iter().all(|filter| filter.matches(port))
    }
}

impl From<PortFilter> for PortFilters {
    fn from(filter: PortFilter) -> Self {
        Self(vec![filter])
    }
}

impl From<Vec<PortFilter>> for PortFilters {
    fn from(filters: Vec<PortFilter>) -> Self {
        Self(filters)
    }
}

impl From<Option<PortFilter>> for PortFilters {
    fn from(filter: Option<PortFilter>) -> Self {
        Self(filter.into_iter().collect())
    }
}

impl FromIterator<PortFilter> for PortFilters {
    fn from_iter<I: IntoIterator<Item = PortFilter>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ============================================================================
// filter_ports
// ============================================================================

/// Returns the ports in `ports` that match every filter, preserving order.
#[must_use]
pub fn filter_ports(ports: &[PortDescriptor], filters: &PortFilters) -> Vec<PortDescriptor> {
    ports
        .iter()
        .filter(|port| filters.matches(port))
        .cloned()
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
