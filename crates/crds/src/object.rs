//! Object model shared by the queue, store and reconciler.
//!
//! Every resource handed out by a store is an owned value. Copies never share
//! mutable sub-structure with the original, so a reconcile pass can work on
//! its snapshot while the store keeps serving other readers.

use crate::error::CrdError;
use kube::Resource;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Namespace used when an object carries none.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Namespace + name of a resource, fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIdentity {
    namespace: String,
    name: String,
}

impl ResourceIdentity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ResourceIdentity {
    type Err = CrdError;

    /// Parses `namespace/name`; a bare `name` lands in the default namespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            None if !s.is_empty() => Ok(Self::new(DEFAULT_NAMESPACE, s)),
            _ => Err(CrdError::InvalidIdentity(s.to_string())),
        }
    }
}

/// Capability set the queue/reconciler scaffolding needs from a resource kind.
pub trait ReconcileObject: Clone + Send + Sync + 'static {
    /// Stable namespace/name identity.
    fn identity(&self) -> Result<ResourceIdentity, CrdError>;

    /// Opaque version token used for optimistic concurrency.
    fn resource_version(&self) -> Option<&str>;

    /// Spec generation; bumped on spec changes only.
    fn generation(&self) -> Option<i64>;

    /// Independent deep copy.
    fn duplicate(&self) -> Self {
        self.clone()
    }
}

impl<K> ReconcileObject for K
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    fn identity(&self) -> Result<ResourceIdentity, CrdError> {
        let meta = self.meta();
        let name = meta.name.as_deref().ok_or(CrdError::MissingName)?;
        let namespace = meta.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE);
        Ok(ResourceIdentity::new(namespace, name))
    }

    fn resource_version(&self) -> Option<&str> {
        self.meta().resource_version.as_deref()
    }

    fn generation(&self) -> Option<i64> {
        self.meta().generation
    }
}

/// Deep-copies an optional object; absent in, absent out.
pub fn duplicate<R: ReconcileObject>(obj: Option<&R>) -> Option<R> {
    obj.map(ReconcileObject::duplicate)
}

/// Deep-copies every element into a fresh list, preserving order.
pub fn duplicate_list<R: ReconcileObject>(list: &ResourceList<R>) -> ResourceList<R> {
    list.iter().map(ReconcileObject::duplicate).collect()
}

/// True iff both objects carry the same resource-version token.
///
/// Objects without a version are never considered the same generation.
pub fn same_version<R: ReconcileObject>(a: &R, b: &R) -> bool {
    match (a.resource_version(), b.resource_version()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Ordered snapshot returned by bulk listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceList<R> {
    items: Vec<R>,
}

impl<R> ResourceList<R> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, item: R) {
        self.items.push(item);
    }

    pub fn get(&self, index: usize) -> Option<&R> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut R> {
        self.items.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, R> {
        self.items.iter()
    }

    pub fn truncate(&mut self, len: usize) {
        self.items.truncate(len);
    }

    pub fn into_items(self) -> Vec<R> {
        self.items
    }
}

impl<R> Default for ResourceList<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> From<Vec<R>> for ResourceList<R> {
    fn from(items: Vec<R>) -> Self {
        Self { items }
    }
}

impl<R> FromIterator<R> for ResourceList<R> {
    fn from_iter<I: IntoIterator<Item = R>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<R> IntoIterator for ResourceList<R> {
    type Item = R;
    type IntoIter = std::vec::IntoIter<R>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, R> IntoIterator for &'a ResourceList<R> {
    type Item = &'a R;
    type IntoIter = std::slice::Iter<'a, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
