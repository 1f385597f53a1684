//! The cluster resource store as seen by the reconciler.
//!
//! Everything the engine does to the cluster goes through [`ChildStore`], so
//! the same reconcile code runs against the API server ([`KubeStore`]) and an
//! in-process store ([`MemoryStore`]).

mod kube_store;
mod memory;

pub use kube_store::KubeStore;
pub use memory::MemoryStore;

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("conflict on {0}")]
    Conflict(String),

    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("kubernetes error: {0}")]
    Kube(#[source] kube::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Optimistic-concurrency failures that a fresh read can resolve. A create
    /// that lost a race is treated the same way.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::AlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl From<kube::Error> for StoreError {
    fn from(e: kube::Error) -> Self {
        match &e {
            kube::Error::Api(ae) if ae.code == 404 => {
                StoreError::NotFound(ae.message.clone())
            }
            kube::Error::Api(ae)
                if ae.code == 409 && ae.reason == "AlreadyExists" =>
            {
                StoreError::AlreadyExists(ae.message.clone())
            }
            kube::Error::Api(ae) if ae.code == 409 => {
                StoreError::Conflict(ae.message.clone())
            }
            _ => StoreError::Kube(e),
        }
    }
}

/// Namespaced kinds the store can hold: Services, ConfigMaps, YurtAppSets and
/// the EdgeX parents themselves.
pub trait Child:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<T> Child for T where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

#[async_trait]
pub trait ChildStore: Send + Sync {
    async fn get<K: Child>(&self, ns: &str, name: &str)
    -> StoreResult<Option<K>>;

    /// List objects carrying `label.0 = label.1`.
    async fn list<K: Child>(
        &self,
        ns: &str,
        label: (&str, &str),
    ) -> StoreResult<Vec<K>>;

    async fn create<K: Child>(&self, ns: &str, obj: &K) -> StoreResult<K>;

    /// Full update guarded by `metadata.resourceVersion`; a stale version
    /// yields [`StoreError::Conflict`].
    async fn replace<K: Child>(&self, ns: &str, obj: &K) -> StoreResult<K>;

    async fn delete<K: Child>(&self, ns: &str, name: &str) -> StoreResult<()>;

    /// JSON merge patch on the main resource (metadata/spec).
    async fn merge_patch<K: Child>(
        &self,
        ns: &str,
        name: &str,
        patch: &Value,
    ) -> StoreResult<K>;

    /// JSON merge patch on the status subresource.
    async fn merge_patch_status<K: Child>(
        &self,
        ns: &str,
        name: &str,
        patch: &Value,
    ) -> StoreResult<K>;
}
