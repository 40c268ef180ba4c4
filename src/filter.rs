//! Filter state and cache-key construction.
//!
//! A [`FilterState`] is what a view's filter bar holds: named fields with
//! primitive values. [`KeyBuilder`] turns that state plus pagination into a
//! deterministic cache key, so logically equal filters always address the
//! same cached page regardless of the order fields were set in.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Separates key segments; must never appear in rendered filter values.
const KEY_SEPARATOR: char = '|';
const KEY_ASSIGN: char = '=';

/// A primitive filter value.
///
/// `Unset` (JSON `null`) and empty text mean "no constraint" and are elided
/// from cache keys, so `{category: null}` and `{}` address the same entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Text(String),
    Number(i64),
    Flag(bool),
    Unset,
}

impl FilterValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    fn is_absent(&self) -> bool {
        match self {
            FilterValue::Unset => true,
            FilterValue::Text(value) => value.is_empty(),
            _ => false,
        }
    }

    fn render(&self) -> String {
        match self {
            FilterValue::Text(value) => value.clone(),
            FilterValue::Number(value) => value.to_string(),
            FilterValue::Flag(value) => value.to_string(),
            FilterValue::Unset => String::new(),
        }
    }
}

/// The active filter fields of a list view.
///
/// Backed by a `BTreeMap` so iteration order, and therefore key order, is
/// independent of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterState(BTreeMap<String, FilterValue>);

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: FilterValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: FilterValue) {
        self.0.insert(name.into(), value);
    }

    /// Marks a field as unconstrained without removing it from the map.
    pub fn unset(&mut self, name: impl Into<String>) {
        self.0.insert(name.into(), FilterValue::Unset);
    }

    pub fn get(&self, name: &str) -> Option<&FilterValue> {
        self.0.get(name)
    }

    /// Text value of a field, if set and non-empty.
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.0.get(name) {
            Some(FilterValue::Text(value)) if !value.is_empty() => Some(value),
            _ => None,
        }
    }

    pub fn number(&self, name: &str) -> Option<i64> {
        match self.0.get(name) {
            Some(FilterValue::Number(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        match self.0.get(name) {
            Some(FilterValue::Flag(value)) => Some(*value),
            _ => None,
        }
    }

    /// Fields that actually constrain the result set, in name order.
    fn present(&self) -> impl Iterator<Item = (&str, &FilterValue)> {
        self.0
            .iter()
            .filter(|(_, value)| !value.is_absent())
            .map(|(name, value)| (name.as_str(), value))
    }
}

/// Builds cache keys for one entity scope (e.g. `orders`, `products`).
///
/// Keys look like `orders|status=pending|page=1|size=20`. The scope prefix is
/// what lets push-event handling invalidate every cached page of an entity
/// type in one sweep.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    scope: String,
}

impl KeyBuilder {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Prefix shared by every key of this scope, for bulk invalidation.
    pub fn scope_prefix(&self) -> String {
        format!("{}{KEY_SEPARATOR}", self.scope)
    }

    /// Reject field names and values that would corrupt the key encoding.
    pub fn validate(&self, filters: &FilterState) -> Result<(), SyncError> {
        for (name, value) in filters.present() {
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            {
                return Err(SyncError::validation(format!(
                    "`{name}` is not a valid filter field name"
                )));
            }
            if let FilterValue::Text(text) = value
                && (text.contains(KEY_SEPARATOR) || text.contains(KEY_ASSIGN))
            {
                return Err(SyncError::validation(format!(
                    "filter `{name}` contains a reserved character"
                )));
            }
        }
        Ok(())
    }

    /// Build the cache key for a filter/pagination combination.
    pub fn build(
        &self,
        filters: &FilterState,
        page: u32,
        page_size: u32,
    ) -> Result<String, SyncError> {
        self.validate(filters)?;

        let mut key = self.scope.clone();
        for (name, value) in filters.present() {
            key.push(KEY_SEPARATOR);
            key.push_str(name);
            key.push(KEY_ASSIGN);
            key.push_str(&value.render());
        }
        key.push_str(&format!("{KEY_SEPARATOR}page{KEY_ASSIGN}{page}"));
        key.push_str(&format!("{KEY_SEPARATOR}size{KEY_ASSIGN}{page_size}"));
        Ok(key)
    }
}
