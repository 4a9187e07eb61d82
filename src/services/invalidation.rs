//! Cache-invalidation contracts returned by every mutating operation.
//!
//! Clients cache reads by `(resource, key)`. A mutation reports exactly which
//! entries it made stale so callers never have to know service internals.

use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Cached read families a client may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    /// Product listings and searches
    Products,
    /// A single product, keyed by id
    Product,
    /// A cart, keyed by `session:<id>` or `user:<id>`
    Cart,
    /// Order listings
    Orders,
    /// A single order, keyed by id
    Order,
    /// Return listings, keyed by order id when scoped
    Returns,
    /// A user's saved addresses, keyed by user id
    Addresses,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Invalidation {
    pub resource: Resource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl Invalidation {
    /// Every cached entry of `resource`.
    pub fn all(resource: Resource) -> Self {
        Self {
            resource,
            key: None,
        }
    }

    /// One cached entry of `resource`.
    pub fn keyed(resource: Resource, key: impl Display) -> Self {
        Self {
            resource,
            key: Some(key.to_string()),
        }
    }
}

/// The outcome of a mutation plus the cache entries it invalidated.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation<T> {
    pub value: T,
    pub invalidates: Vec<Invalidation>,
}

impl<T> Mutation<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            invalidates: Vec::new(),
        }
    }

    /// Adds an invalidation, skipping duplicates.
    pub fn invalidate(mut self, invalidation: Invalidation) -> Self {
        if !self.invalidates.contains(&invalidation) {
            self.invalidates.push(invalidation);
        }
        self
    }

    pub fn invalidate_all(self, invalidations: impl IntoIterator<Item = Invalidation>) -> Self {
        invalidations
            .into_iter()
            .fold(self, |acc, invalidation| acc.invalidate(invalidation))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Mutation<U> {
        Mutation {
            value: f(self.value),
            invalidates: self.invalidates,
        }
    }

    /// Splits into the value and its invalidations for the response envelope.
    pub fn into_parts(self) -> (T, Vec<Invalidation>) {
        (self.value, self.invalidates)
    }
}
