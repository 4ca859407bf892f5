//! Group/version registration table.
//!
//! The table is built once, on first access, and is read-only afterwards.
//! Stores receive a `&'static GroupVersionRegistry` and resolve the
//! group/version of the kind they serve through it.

use crate::error::CrdError;
use crate::replicated_app::ReplicatedApp;
use kube::Resource;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

static REGISTRY: OnceLock<GroupVersionRegistry> = OnceLock::new();

/// Static (group, version) pair for a resource kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupVersion {
    pub group: String,
    pub version: String,
}

impl GroupVersion {
    pub fn new(group: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
        }
    }

    /// Group/version of a typed kube resource.
    pub fn of<K: Resource<DynamicType = ()>>() -> Self {
        Self::new(K::group(&()), K::version(&()))
    }

    /// `apiVersion` string, e.g. `apps.microscaler.io/v1alpha1`.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.api_version())
    }
}

/// Kind → group/version table.
#[derive(Debug, Clone, Default)]
pub struct GroupVersionRegistry {
    kinds: BTreeMap<String, GroupVersion>,
}

impl GroupVersionRegistry {
    /// Table containing every kind this workspace defines.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.insert::<ReplicatedApp>();
        registry
    }

    fn insert<K: Resource<DynamicType = ()>>(&mut self) {
        self.kinds.insert(K::kind(&()).into_owned(), GroupVersion::of::<K>());
    }

    /// Resolves the group/version registered for `kind`.
    pub fn lookup(&self, kind: &str) -> Result<&GroupVersion, CrdError> {
        self.kinds
            .get(kind)
            .ok_or_else(|| CrdError::UnknownKind(kind.to_string()))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }
}

/// Process-wide registry, initialised on first call.
pub fn registry() -> &'static GroupVersionRegistry {
    REGISTRY.get_or_init(GroupVersionRegistry::builtin)
}
