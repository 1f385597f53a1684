use async_trait::async_trait;
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use serde_json::Value;
use tracing::trace;

use super::{Child, ChildStore, StoreResult};

/// [`ChildStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: Child>(&self, ns: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), ns)
    }
}

#[async_trait]
impl ChildStore for KubeStore {
    async fn get<K: Child>(
        &self,
        ns: &str,
        name: &str,
    ) -> StoreResult<Option<K>> {
        Ok(self.api::<K>(ns).get_opt(name).await?)
    }

    async fn list<K: Child>(
        &self,
        ns: &str,
        label: (&str, &str),
    ) -> StoreResult<Vec<K>> {
        let lp =
            ListParams::default().labels(&format!("{}={}", label.0, label.1));
        let list = self.api::<K>(ns).list(&lp).await?;
        trace!(%ns, kind = %K::kind(&()), count = list.items.len(), "kube_store: listed");
        Ok(list.items)
    }

    async fn create<K: Child>(&self, ns: &str, obj: &K) -> StoreResult<K> {
        Ok(self.api::<K>(ns).create(&PostParams::default(), obj).await?)
    }

    async fn replace<K: Child>(&self, ns: &str, obj: &K) -> StoreResult<K> {
        let name = obj.meta().name.clone().unwrap_or_default();
        Ok(self
            .api::<K>(ns)
            .replace(&name, &PostParams::default(), obj)
            .await?)
    }

    async fn delete<K: Child>(&self, ns: &str, name: &str) -> StoreResult<()> {
        let _ = self
            .api::<K>(ns)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn merge_patch<K: Child>(
        &self,
        ns: &str,
        name: &str,
        patch: &Value,
    ) -> StoreResult<K> {
        Ok(self
            .api::<K>(ns)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }

    async fn merge_patch_status<K: Child>(
        &self,
        ns: &str,
        name: &str,
        patch: &Value,
    ) -> StoreResult<K> {
        Ok(self
            .api::<K>(ns)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }
}
