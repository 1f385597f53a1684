//! Release of generated children that the parent no longer desires.

use std::collections::HashSet;

use k8s_openapi::api::core::v1::{ConfigMap, Service};
use tracing::{debug, info};

use super::materialize::Scope;
use super::ownership::{Release, remove_owner};
use super::retry::retry_on_conflict;
use super::topology;
use crate::crd::edgex::LABEL_EDGEX_GENERATE;
use crate::crd::yurt_app_set::YurtAppSet;
use crate::store::{Child, ChildStore, StoreResult};

/// Kinds that can be swept, with any parent-specific state to strip before
/// an object shared with other parents is written back.
pub trait Sweepable: Child {
    fn detach(&mut self, _pool: &str) {}
}

impl Sweepable for Service {}

impl Sweepable for ConfigMap {}

impl Sweepable for YurtAppSet {
    fn detach(&mut self, pool: &str) {
        topology::remove_pool(&mut self.spec, pool);
    }
}

/// Release every object of kind `K` marked `marker` whose name is not in
/// `desired`. Returns how many objects the parent was released from.
pub async fn sweep<K: Sweepable, S: ChildStore>(
    store: &S,
    scope: &Scope<'_>,
    marker: &str,
    desired: &HashSet<&str>,
) -> StoreResult<usize> {
    let marked: Vec<K> = store
        .list(scope.ns, (LABEL_EDGEX_GENERATE, marker))
        .await?;
    let mut released = 0;
    for obj in marked {
        let name = obj.meta().name.clone().unwrap_or_default();
        if desired.contains(name.as_str()) {
            continue;
        }
        if release::<K, S>(store, scope, &name).await? != Release::NotOwned {
            released += 1;
        }
    }
    if released > 0 {
        debug!(ns = %scope.ns, kind = %K::kind(&()), released, "sweep complete");
    }
    Ok(released)
}

/// Drop the parent from the owners of `name`, deleting it when no owner
/// remains. A missing object counts as already released.
pub async fn release<K: Sweepable, S: ChildStore>(
    store: &S,
    scope: &Scope<'_>,
    name: &str,
) -> StoreResult<Release> {
    retry_on_conflict(scope.retry, "release_owner", || {
        release_once::<K, S>(store, scope, name)
    })
    .await
}

async fn release_once<K: Sweepable, S: ChildStore>(
    store: &S,
    scope: &Scope<'_>,
    name: &str,
) -> StoreResult<Release> {
    let Some(mut obj) = store.get::<K>(scope.ns, name).await? else {
        return Ok(Release::NotOwned);
    };
    let disposition = remove_owner(obj.meta_mut(), scope.parent);
    match disposition {
        Release::NotOwned => {}
        Release::Delete => {
            match store.delete::<K>(scope.ns, name).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            info!(ns = %scope.ns, %name, kind = %K::kind(&()), "last owner released; deleted");
        }
        Release::Keep => {
            obj.detach(scope.pool);
            store.replace(scope.ns, &obj).await?;
            info!(ns = %scope.ns, %name, kind = %K::kind(&()), "owner released");
        }
    }
    Ok(disposition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::materialize::{build_service, build_yurt_app_set};
    use crate::controller::ownership::{ParentRef, add_owner};
    use crate::controller::retry::RetryConfig;
    use crate::crd::edgex::{ComponentSpec, GENERATE_DEPLOYMENT, GENERATE_SERVICE};
    use crate::store::MemoryStore;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::core::v1::ServiceSpec;

    fn parent(uid: &str) -> ParentRef {
        ParentRef {
            api_version: "device.openyurt.io/v1alpha2".into(),
            kind: "EdgeX".into(),
            name: format!("edgex-{uid}"),
            uid: uid.into(),
        }
    }

    #[tokio::test]
    async fn sweep_deletes_sole_owned_and_keeps_desired() {
        let store = MemoryStore::new();
        let p = parent("u1");
        let retry = RetryConfig::default();
        let scope = Scope { ns: "default", pool: "east", parent: &p, retry: &retry };
        for name in ["a", "b"] {
            store
                .create("default", &build_service(&scope, name, &ServiceSpec::default()))
                .await
                .unwrap();
        }

        let desired = HashSet::from(["a"]);
        let n = sweep::<Service, _>(&store, &scope, GENERATE_SERVICE, &desired)
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert!(store.get::<Service>("default", "a").await.unwrap().is_some());
        assert!(store.get::<Service>("default", "b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn shared_workload_keeps_other_pool() {
        let store = MemoryStore::new();
        let retry = RetryConfig::default();
        let east = parent("u1");
        let west = parent("u2");
        let east_scope = Scope { ns: "default", pool: "east", parent: &east, retry: &retry };
        let c = ComponentSpec {
            name: "edgex-core-data".into(),
            service: None,
            deployment: Some(DeploymentSpec::default()),
        };
        let mut yas = build_yurt_app_set(&east_scope, &c, &DeploymentSpec::default());
        yas.spec.topology.pools.push(topology::pool_entry("west"));
        add_owner(&mut yas.metadata, &west);
        store.create("default", &yas).await.unwrap();

        let n = sweep::<YurtAppSet, _>(&store, &east_scope, GENERATE_DEPLOYMENT, &HashSet::new())
            .await
            .unwrap();
        assert_eq!(n, 1);

        let yas: YurtAppSet =
            store.get("default", "edgex-core-data").await.unwrap().unwrap();
        let pools: Vec<_> =
            yas.spec.topology.pools.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(pools, ["west"]);
        let owners = yas.metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].uid, "u2");
    }

    #[tokio::test]
    async fn release_of_missing_object_is_not_owned() {
        let store = MemoryStore::new();
        let p = parent("u1");
        let retry = RetryConfig::default();
        let scope = Scope { ns: "default", pool: "east", parent: &p, retry: &retry };
        let r = release::<ConfigMap, _>(&store, &scope, "common-variables")
            .await
            .unwrap();
        assert_eq!(r, Release::NotOwned);
    }
}
