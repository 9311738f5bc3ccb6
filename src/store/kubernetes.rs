//! Kubernetes-backed lock store.
//!
//! Lock records are ConfigMaps in the coordination namespace. Updates and
//! deletes carry the record's UID (and, for updates, its resource version)
//! so the API server rejects them with 409 Conflict when another claimant
//! got there first.

use super::{EventStream, LockStore, PodInfo, PodPhase, StoreError, StoreResult, WatchEvent};
use crate::error::{BuildLockError, Result};
use crate::locks::{KIND_LABEL, KIND_VALUE, LockData, LockRecord, OwnerLink, POD_KIND};
use async_trait::async_trait;
use futures::{StreamExt, future};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{Api, DeleteParams, ListParams, PostParams, Preconditions, WatchParams};
use kube::core::WatchEvent as ApiWatchEvent;
use kube::Client;
use std::collections::BTreeMap;
use tracing::debug;

/// [`LockStore`] over the Kubernetes API.
#[derive(Clone)]
pub struct KubeLockStore {
    locks: Api<ConfigMap>,
    pods: Api<Pod>,
    deployments: Api<Deployment>,
}

impl KubeLockStore {
    /// Store lock records, and look up pods and deployments, in `namespace`.
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            locks: Api::namespaced(client.clone(), namespace),
            pods: Api::namespaced(client.clone(), namespace),
            deployments: Api::namespaced(client, namespace),
        }
    }

    /// Connect with the in-cluster or kubeconfig credentials.
    pub async fn connect(namespace: &str) -> Result<Self> {
        let client = Client::try_default().await.map_err(|e| {
            BuildLockError::Store(format!("cannot connect to the Kubernetes API: {}", e))
        })?;
        debug!("connected to the Kubernetes API, namespace {}", namespace);
        Ok(Self::new(client, namespace))
    }
}

fn store_error(err: kube::Error, what: String) -> StoreError {
    match err {
        // AlreadyExists is a 409 as well, so check the reason first
        kube::Error::Api(response) if response.reason == "AlreadyExists" => {
            StoreError::AlreadyExists(what)
        }
        kube::Error::Api(response) if response.code == 404 => StoreError::NotFound(what),
        kube::Error::Api(response) if response.code == 409 => StoreError::Conflict(what),
        other => StoreError::Api(format!("{}: {}", what, other)),
    }
}

fn lock_what(name: &str) -> String {
    format!("configmap {}", name)
}

fn record_from_config_map(config_map: ConfigMap) -> LockRecord {
    let meta = config_map.metadata;
    let owners = meta
        .owner_references
        .unwrap_or_default()
        .into_iter()
        .map(|o| OwnerLink {
            api_version: o.api_version,
            kind: o.kind,
            name: o.name,
            uid: o.uid,
        })
        .collect();

    LockRecord {
        name: meta.name.unwrap_or_default(),
        uid: meta.uid,
        resource_version: meta.resource_version,
        labels: meta.labels.unwrap_or_default(),
        annotations: meta.annotations.unwrap_or_default(),
        owners,
        data: LockData::from_map(&config_map.data.unwrap_or_default()),
    }
}

fn config_map_from_record(record: &LockRecord) -> ConfigMap {
    let owner_references = (!record.owners.is_empty()).then(|| {
        record
            .owners
            .iter()
            .map(|o| OwnerReference {
                api_version: o.api_version.clone(),
                kind: o.kind.clone(),
                name: o.name.clone(),
                uid: o.uid.clone(),
                ..Default::default()
            })
            .collect()
    });

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(record.name.clone()),
            uid: record.uid.clone(),
            resource_version: record.resource_version.clone(),
            labels: Some(record.labels.clone()),
            annotations: Some(record.annotations.clone()),
            owner_references,
            ..Default::default()
        },
        data: Some(record.data.to_map()),
        ..Default::default()
    }
}

fn pod_info(pod: Pod) -> PodInfo {
    let meta = pod.metadata;
    let phase = pod.status.and_then(|s| s.phase);
    PodInfo {
        name: meta.name.unwrap_or_default(),
        uid: meta.uid.unwrap_or_default(),
        // typed objects do not carry their type information
        api_version: "v1".to_string(),
        kind: POD_KIND.to_string(),
        resource_version: meta.resource_version,
        phase: PodPhase::parse(phase.as_deref()),
        labels: meta.labels.unwrap_or_default(),
    }
}

fn map_event<K, T>(
    event: kube::Result<ApiWatchEvent<K>>,
    convert: fn(K) -> T,
) -> Option<WatchEvent<T>> {
    match event {
        Ok(ApiWatchEvent::Added(obj)) => Some(WatchEvent::Added(convert(obj))),
        Ok(ApiWatchEvent::Modified(obj)) => Some(WatchEvent::Modified(convert(obj))),
        Ok(ApiWatchEvent::Deleted(obj)) => Some(WatchEvent::Deleted(convert(obj))),
        Ok(ApiWatchEvent::Bookmark(_)) => None,
        Ok(ApiWatchEvent::Error(response)) => Some(WatchEvent::Error(response.message)),
        Err(e) => Some(WatchEvent::Error(e.to_string())),
    }
}

fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl LockStore for KubeLockStore {
    async fn create_lock(&self, record: &LockRecord) -> StoreResult<LockRecord> {
        let mut config_map = config_map_from_record(record);
        config_map.metadata.uid = None;
        config_map.metadata.resource_version = None;
        self.locks
            .create(&PostParams::default(), &config_map)
            .await
            .map(record_from_config_map)
            .map_err(|e| store_error(e, lock_what(&record.name)))
    }

    async fn get_lock(&self, name: &str) -> StoreResult<LockRecord> {
        self.locks
            .get(name)
            .await
            .map(record_from_config_map)
            .map_err(|e| store_error(e, lock_what(name)))
    }

    async fn update_lock(&self, record: &LockRecord) -> StoreResult<LockRecord> {
        // uid and resourceVersion in the body are the preconditions
        self.locks
            .replace(&record.name, &PostParams::default(), &config_map_from_record(record))
            .await
            .map(record_from_config_map)
            .map_err(|e| store_error(e, lock_what(&record.name)))
    }

    async fn delete_lock(&self, name: &str, uid: &str) -> StoreResult<()> {
        let params = DeleteParams {
            preconditions: Some(Preconditions {
                uid: Some(uid.to_string()),
                resource_version: None,
            }),
            ..Default::default()
        };
        self.locks
            .delete(name, &params)
            .await
            .map(|_| ())
            .map_err(|e| store_error(e, lock_what(name)))
    }

    async fn list_locks(&self) -> StoreResult<Vec<LockRecord>> {
        let params = ListParams::default().labels(&format!("{}={}", KIND_LABEL, KIND_VALUE));
        let list = self
            .locks
            .list(&params)
            .await
            .map_err(|e| store_error(e, "configmaps".to_string()))?;
        Ok(list.items.into_iter().map(record_from_config_map).collect())
    }

    async fn watch_lock(&self, record: &LockRecord) -> StoreResult<EventStream<LockRecord>> {
        let params = WatchParams::default().fields(&format!("metadata.name={}", record.name));
        let version = record.resource_version.as_deref().unwrap_or("0");
        let events = self
            .locks
            .watch(&params, version)
            .await
            .map_err(|e| store_error(e, lock_what(&record.name)))?;
        Ok(events
            .filter_map(|event| future::ready(map_event(event, record_from_config_map)))
            .boxed())
    }

    async fn get_pod(&self, name: &str) -> StoreResult<PodInfo> {
        self.pods
            .get(name)
            .await
            .map(pod_info)
            .map_err(|e| store_error(e, format!("pod {}", name)))
    }

    async fn watch_pod(&self, pod: &PodInfo) -> StoreResult<EventStream<PodInfo>> {
        let params = WatchParams::default().fields(&format!("metadata.name={}", pod.name));
        let version = pod.resource_version.as_deref().unwrap_or("0");
        let events = self
            .pods
            .watch(&params, version)
            .await
            .map_err(|e| store_error(e, format!("pod {}", pod.name)))?;
        Ok(events
            .filter_map(|event| future::ready(map_event(event, pod_info)))
            .boxed())
    }

    async fn find_pods(&self, labels: &BTreeMap<String, String>) -> StoreResult<Vec<PodInfo>> {
        let selector = selector_string(labels);
        let list = self
            .pods
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| store_error(e, format!("pods ({})", selector)))?;
        Ok(list.items.into_iter().map(pod_info).collect())
    }

    async fn deployment_exists(&self, name: &str) -> StoreResult<bool> {
        self.deployments
            .get_opt(name)
            .await
            .map(|d| d.is_some())
            .map_err(|e| store_error(e, format!("deployment {}", name)))
    }
}
