#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use edgex_crm::catalog::{Catalog, Variant};
use edgex_crm::config::ReconcileConfig;
use edgex_crm::controller::{ControllerContext, ReconcileErr, reconcile};
use edgex_crm::crd::edgex::{ComponentSpec, EdgeX, EdgeXSpec};
use edgex_crm::crd::YurtAppSet;
use edgex_crm::store::{ChildStore, MemoryStore};
use k8s_openapi::api::apps::v1::DeploymentSpec;
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, PodSpec, PodTemplateSpec, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::core::ObjectMeta;
use kube::runtime::controller::Action;
use serde_json::json;

pub const NS: &str = "edgex-system";

// DNS-1123 safe numeric suffix for unique names
pub const DIGITS: [char; 10] =
    ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];
pub fn uniq(prefix: &str) -> String {
    format!("{prefix}-{}", nanoid::nanoid!(6, &DIGITS))
}

pub fn service_spec(port: i32) -> ServiceSpec {
    ServiceSpec {
        ports: Some(vec![ServicePort {
            port,
            ..Default::default()
        }]),
        ..Default::default()
    }
}

pub fn deployment_spec(app: &str) -> DeploymentSpec {
    let labels = BTreeMap::from([("app".to_string(), app.to_string())]);
    DeploymentSpec {
        selector: LabelSelector {
            match_labels: Some(labels.clone()),
            ..Default::default()
        },
        template: PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(labels),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: app.to_string(),
                    image: Some(format!("edgexfoundry/{app}:2.1.1")),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        },
        ..Default::default()
    }
}

/// A component with both a Service and a workload.
pub fn component(name: &str, port: i32) -> ComponentSpec {
    ComponentSpec {
        name: name.to_string(),
        service: Some(service_spec(port)),
        deployment: Some(deployment_spec(name)),
    }
}

pub fn common_config_map() -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some("common-variables".into()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "SERVICE_HOST".to_string(),
            "0.0.0.0".to_string(),
        )])),
        ..Default::default()
    }
}

pub fn catalog(versions: &[(&str, Vec<ComponentSpec>)]) -> Catalog {
    versions
        .iter()
        .fold(Catalog::default(), |c, (version, components)| {
            c.with_version(
                Variant::Standard,
                version,
                components.clone(),
                vec![common_config_map()],
            )
        })
}

pub struct Harness {
    pub store: MemoryStore,
    pub ctx: Arc<ControllerContext<MemoryStore>>,
}

impl Harness {
    pub fn new(catalog: Catalog) -> Self {
        let store = MemoryStore::new();
        let ctx = Arc::new(ControllerContext::new(
            store.clone(),
            Arc::new(catalog),
            ReconcileConfig::default(),
        ));
        Self { store, ctx }
    }

    pub async fn create_edgex(&self, name: &str, spec: EdgeXSpec) -> EdgeX {
        self.store
            .create(NS, &EdgeX::new(name, spec))
            .await
            .expect("create edgex")
    }

    pub async fn edgex(&self, name: &str) -> Option<EdgeX> {
        self.store.get(NS, name).await.expect("get edgex")
    }

    /// One reconcile pass against the current stored object.
    pub async fn reconcile(&self, name: &str) -> Result<Action, ReconcileErr> {
        let obj = self.edgex(name).await.expect("edgex exists");
        reconcile(Arc::new(obj), self.ctx.clone()).await
    }

    /// Finalizer pass plus one converging pass.
    pub async fn converge(&self, name: &str) -> Result<Action, ReconcileErr> {
        let first = self.reconcile(name).await?;
        assert_eq!(first, Action::await_change());
        self.reconcile(name).await
    }

    /// Request deletion and run the cleanup pass.
    pub async fn delete(&self, name: &str) -> Result<Action, ReconcileErr> {
        self.store
            .delete::<EdgeX>(NS, name)
            .await
            .expect("delete edgex");
        self.reconcile(name).await
    }

    /// Act as the workload controller for `name`.
    pub async fn report_workload(
        &self,
        name: &str,
        pools: &[&str],
        replicas: i32,
        ready: i32,
    ) {
        let pool_replicas: BTreeMap<String, i32> =
            pools.iter().map(|p| (p.to_string(), 1)).collect();
        self.store
            .set_status::<YurtAppSet>(
                NS,
                name,
                json!({
                    "replicas": replicas,
                    "readyReplicas": ready,
                    "poolReplicas": pool_replicas,
                }),
            )
            .await
            .expect("set yurtappset status");
    }
}

pub fn spec(version: &str, pool: &str) -> EdgeXSpec {
    EdgeXSpec {
        version: version.to_string(),
        pool_name: pool.to_string(),
        ..Default::default()
    }
}

pub fn owner_uids(meta: &ObjectMeta) -> Vec<String> {
    meta.owner_references
        .iter()
        .flatten()
        .map(|o| o.uid.clone())
        .collect()
}
