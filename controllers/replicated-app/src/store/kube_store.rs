//! Kubernetes-backed API store
//!
//! Status writes carry `metadata.resourceVersion` in the merge patch, so the
//! API server rejects them with 409 when the object changed since it was
//! read.

use super::{ApiStore, ChangeKind, WatchEvent, WatchStream};
use crate::error::StoreError;
use async_trait::async_trait;
use crds::{GroupVersion, GroupVersionRegistry, ReconcileObject, ReplicatedApp, ReplicatedAppStatus, ResourceIdentity, ResourceList};
use futures::StreamExt;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::core::GroupVersionKind;
use kube::{Client, Resource};
use kube_runtime::watcher::{self, Event};
use kube_runtime::WatchStreamExt;
use serde_json::json;
use tracing::{debug, info, warn};

pub struct KubeStore {
    client: Client,
    namespace: Option<String>,
    group_version: GroupVersion,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("namespace", &self.namespace)
            .field("group_version", &self.group_version)
            .finish()
    }
}

impl KubeStore {
    /// Create a store for ReplicatedApps in `namespace` (all namespaces if `None`)
    ///
    /// Fails if the API server does not serve the registered group/version.
    pub async fn new(client: Client, namespace: Option<String>, registry: &GroupVersionRegistry) -> Result<Self, StoreError> {
        let kind = ReplicatedApp::kind(&());
        let group_version = registry.lookup(&kind)?.clone();

        let gvk = GroupVersionKind::gvk(&group_version.group, &group_version.version, &kind);
        kube::discovery::pinned_kind(&client, &gvk).await?;
        info!("API server serves {} {}", group_version, kind);

        Ok(Self {
            client,
            namespace,
            group_version,
        })
    }

    fn api_for(&self, identity: &ResourceIdentity) -> Api<ReplicatedApp> {
        Api::namespaced(self.client.clone(), identity.namespace())
    }

    fn scoped_api(&self) -> Api<ReplicatedApp> {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

fn event_for(app: &ReplicatedApp, kind: ChangeKind) -> Option<WatchEvent> {
    match app.identity() {
        Ok(identity) => Some(WatchEvent::new(identity, kind, Some(app))),
        Err(e) => {
            warn!("Ignoring watch event for object without identity: {}", e);
            None
        }
    }
}

#[async_trait]
impl ApiStore for KubeStore {
    async fn get(&self, identity: &ResourceIdentity) -> Result<Option<ReplicatedApp>, StoreError> {
        Ok(self.api_for(identity).get_opt(identity.name()).await?)
    }

    async fn list(&self) -> Result<ResourceList<ReplicatedApp>, StoreError> {
        let list = self.scoped_api().list(&ListParams::default()).await?;
        Ok(list.items.into_iter().collect())
    }

    async fn watch(&self) -> Result<WatchStream, StoreError> {
        let stream = watcher::watcher(self.scoped_api(), watcher::Config::default())
            .default_backoff()
            .filter_map(|event| async move {
                match event {
                    Ok(Event::InitApply(app)) => event_for(&app, ChangeKind::Added).map(Ok),
                    Ok(Event::Apply(app)) => event_for(&app, ChangeKind::Modified).map(Ok),
                    Ok(Event::Delete(app)) => event_for(&app, ChangeKind::Deleted).map(Ok),
                    Ok(Event::Init | Event::InitDone) => None,
                    Err(e) => Some(Err(StoreError::from(e))),
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
        let patch = json!({
            "metadata": { "resourceVersion": expected_version },
            "status": status,
        });
        debug!("Patching status of {} at version {}", identity, expected_version);

        let result = self
            .api_for(identity)
            .patch_status(identity.name(), &PatchParams::default(), &Patch::Merge(&patch))
            .await;

        match result {
            Ok(updated) => Ok(updated.metadata.resource_version.unwrap_or_default()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(StoreError::Conflict {
                identity: identity.clone(),
                expected: expected_version.to_string(),
                actual: ae.message,
            }),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Err(StoreError::NotFound(identity.clone())),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        format!(
            "kubernetes store ({}, namespace {})",
            self.group_version,
            self.namespace.as_deref().unwrap_or("*")
        )
    }
}
