//! In-process API store
//!
//! Objects are kept in a `BTreeMap` behind a std `RwLock`. Every read hands
//! out an owned copy; every write assigns a fresh resource version from a
//! store-wide counter and publishes a watch event on a broadcast channel
//! while still holding the write lock, so subscribers see changes in order.

use super::{ApiStore, ChangeKind, WatchEvent, WatchStream};
use crate::error::StoreError;
use async_trait::async_trait;
use crds::{
    GroupVersion, GroupVersionRegistry, ReconcileObject, ReplicatedApp, ReplicatedAppSpec,
    ReplicatedAppStatus, ResourceIdentity, ResourceList,
};
use futures::StreamExt;
use kube::Resource;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tracing::{debug, info};

const EVENT_BUFFER: usize = 1024;

#[derive(Debug)]
pub struct InMemoryStore {
    objects: RwLock<BTreeMap<ResourceIdentity, ReplicatedApp>>,
    version: AtomicU64,
    events: broadcast::Sender<WatchEvent>,
    group_version: GroupVersion,
}

impl InMemoryStore {
    /// Create an empty store serving the ReplicatedApp kind
    ///
    /// The group/version is resolved once through `registry`.
    pub fn new(registry: &GroupVersionRegistry) -> Result<Self, StoreError> {
        let group_version = registry.lookup(&ReplicatedApp::kind(&()))?.clone();
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Ok(Self {
            objects: RwLock::new(BTreeMap::new()),
            version: AtomicU64::new(0),
            events,
            group_version,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<ResourceIdentity, ReplicatedApp>> {
        self.objects.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<ResourceIdentity, ReplicatedApp>> {
        self.objects.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_version(&self) -> String {
        self.version.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn publish(&self, identity: ResourceIdentity, kind: ChangeKind, app: Option<&ReplicatedApp>) {
        // No subscribers is fine; the next relist picks the change up
        let _ = self.events.send(WatchEvent::new(identity, kind, app));
    }

    pub fn group_version(&self) -> &GroupVersion {
        &self.group_version
    }

    /// Declare a new object.
    ///
    /// Assigns uid, generation 1 and a fresh resource version. A missing
    /// namespace is defaulted.
    pub fn create(&self, mut app: ReplicatedApp) -> Result<ReplicatedApp, StoreError> {
        let identity = app.identity()?;
        let mut objects = self.write();
        if objects.contains_key(&identity) {
            return Err(StoreError::AlreadyExists(identity));
        }

        app.metadata.namespace = Some(identity.namespace().to_string());
        app.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        app.metadata.generation = Some(1);
        app.metadata.resource_version = Some(self.next_version());

        debug!("Created {} at version {:?}", identity, app.metadata.resource_version);
        self.publish(identity.clone(), ChangeKind::Added, Some(&app));
        objects.insert(identity, app.clone());
        Ok(app)
    }

    /// Replace the spec of an existing object.
    ///
    /// Bumps generation and resource version. Submitting the current spec
    /// again is a no-op.
    pub fn update_spec(&self, identity: &ResourceIdentity, spec: ReplicatedAppSpec) -> Result<ReplicatedApp, StoreError> {
        let mut objects = self.write();
        let app = objects
            .get_mut(identity)
            .ok_or_else(|| StoreError::NotFound(identity.clone()))?;
        if app.spec == spec {
            return Ok(app.clone());
        }

        app.spec = spec;
        app.metadata.generation = Some(app.metadata.generation.unwrap_or(0) + 1);
        app.metadata.resource_version = Some(self.next_version());
        let updated = app.clone();

        debug!("Updated spec of {} to generation {:?}", identity, updated.metadata.generation);
        self.publish(identity.clone(), ChangeKind::Modified, Some(&updated));
        Ok(updated)
    }

    /// Remove an object, delivering a tombstone event
    pub fn delete(&self, identity: &ResourceIdentity) -> Result<ReplicatedApp, StoreError> {
        let mut objects = self.write();
        let app = objects
            .remove(identity)
            .ok_or_else(|| StoreError::NotFound(identity.clone()))?;
        debug!("Deleted {}", identity);
        self.publish(identity.clone(), ChangeKind::Deleted, None);
        Ok(app)
    }

    /// Load every ReplicatedApp document of a multi-document YAML manifest
    pub fn seed_from_yaml(&self, manifest: &str) -> Result<usize, StoreError> {
        let mut count = 0;
        for document in serde_yaml::Deserializer::from_str(manifest) {
            let value = serde_yaml::Value::deserialize(document)?;
            if value.is_null() {
                continue;
            }
            let app: ReplicatedApp = serde_yaml::from_value(value)?;
            self.create(app)?;
            count += 1;
        }
        info!("Seeded {} ReplicatedApp(s) into the in-memory store", count);
        Ok(count)
    }

    /// Owned copy of the stored object, without going through the trait
    pub fn snapshot(&self, identity: &ResourceIdentity) -> Option<ReplicatedApp> {
        crds::duplicate(self.read().get(identity))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[async_trait]
impl ApiStore for InMemoryStore {
    async fn get(&self, identity: &ResourceIdentity) -> Result<Option<ReplicatedApp>, StoreError> {
        Ok(self.snapshot(identity))
    }

    async fn list(&self) -> Result<ResourceList<ReplicatedApp>, StoreError> {
        Ok(self.read().values().map(ReconcileObject::duplicate).collect())
    }

    async fn watch(&self) -> Result<WatchStream, StoreError> {
        let rx = self.events.subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(event) => Some((Ok(event), rx)),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    Some((Err(StoreError::WatchLagged(missed)), rx))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });
        Ok(stream.boxed())
    }

    async fn write_status(
        &self,
        identity: &ResourceIdentity,
        expected_version: &str,
        status: &ReplicatedAppStatus,
    ) -> Result<String, StoreError> {
        let mut objects = self.write();
        let app = objects
            .get_mut(identity)
            .ok_or_else(|| StoreError::NotFound(identity.clone()))?;

        let actual = app.metadata.resource_version.clone().unwrap_or_default();
        if actual != expected_version {
            return Err(StoreError::Conflict {
                identity: identity.clone(),
                expected: expected_version.to_string(),
                actual,
            });
        }

        let version = self.next_version();
        app.status = Some(status.clone());
        app.metadata.resource_version = Some(version.clone());
        let updated = app.clone();
        self.publish(identity.clone(), ChangeKind::Modified, Some(&updated));
        Ok(version)
    }

    fn describe(&self) -> String {
        format!("in-memory store ({})", self.group_version)
    }
}
