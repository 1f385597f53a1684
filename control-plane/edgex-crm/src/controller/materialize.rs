//! Create-or-converge for generated children.
//!
//! Every ensure step is a read-modify-write that is retried on conflict with
//! a fresh read, and writes only when the live object actually differs.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::core::ObjectMeta;
use tracing::{debug, info, instrument, warn};

use super::ownership::{ParentRef, add_owner};
use super::retry::{RetryConfig, retry_on_conflict};
use super::topology;
use crate::crd::edgex::{
    ComponentSpec, GENERATE_CONFIGMAP, GENERATE_DEPLOYMENT, GENERATE_SERVICE,
    LABEL_EDGEX_GENERATE,
};
use crate::crd::yurt_app_set::{
    DeploymentTemplate, Topology, WorkloadTemplate, YurtAppSet, YurtAppSetSpec,
};
use crate::store::{ChildStore, StoreResult};

pub const ANNOTATION_TOPOLOGY_KEYS: &str = "openyurt.io/topologyKeys";
pub const TOPOLOGY_NODE_POOL: &str = "openyurt.io/nodepool";

/// Who is materializing, and where.
#[derive(Clone, Copy, Debug)]
pub struct Scope<'a> {
    pub ns: &'a str,
    pub pool: &'a str,
    pub parent: &'a ParentRef,
    pub retry: &'a RetryConfig,
}

/// Result of converging one component's workload side.
#[derive(Clone, Debug)]
pub enum WorkloadOutcome {
    /// The component has no deployment.
    NotDesired,
    /// No YurtAppSet existed; one was created this pass.
    Created,
    /// The YurtAppSet as read before this pass changed it.
    Existing(Box<YurtAppSet>),
}

fn ensure_entry(
    map: &mut Option<BTreeMap<String, String>>,
    key: &str,
    value: &str,
) -> bool {
    let map = map.get_or_insert_with(BTreeMap::new);
    if map.get(key).map(String::as_str) == Some(value) {
        return false;
    }
    map.insert(key.to_string(), value.to_string());
    true
}

fn generated_meta(
    scope: &Scope<'_>,
    name: &str,
    marker: &str,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(scope.ns.to_string()),
        labels: Some(BTreeMap::from([(
            LABEL_EDGEX_GENERATE.to_string(),
            marker.to_string(),
        )])),
        owner_references: Some(vec![scope.parent.owner_reference()]),
        ..Default::default()
    }
}

pub fn build_service(
    scope: &Scope<'_>,
    name: &str,
    spec: &ServiceSpec,
) -> Service {
    let mut metadata = generated_meta(scope, name, GENERATE_SERVICE);
    metadata.annotations = Some(BTreeMap::from([(
        ANNOTATION_TOPOLOGY_KEYS.to_string(),
        TOPOLOGY_NODE_POOL.to_string(),
    )]));
    Service {
        metadata,
        spec: Some(spec.clone()),
        status: None,
    }
}

/// Fold `desired` onto a live Service spec. Fields the API server allocates
/// or defaults survive when `desired` leaves them unset; node ports are kept
/// only while the type stays the same. Returns whether anything changed.
pub fn converge_service_spec(live: &mut ServiceSpec, desired: &ServiceSpec) -> bool {
    let mut target = desired.clone();
    let same_type = target.type_.is_none() || target.type_ == live.type_;
    if target.type_.is_none() {
        target.type_ = live.type_.clone();
    }

    // allocated once, immutable afterwards
    target.cluster_ip = target.cluster_ip.or_else(|| live.cluster_ip.clone());
    target.cluster_ips = target.cluster_ips.or_else(|| live.cluster_ips.clone());
    target.ip_families = target.ip_families.or_else(|| live.ip_families.clone());
    target.ip_family_policy = target
        .ip_family_policy
        .or_else(|| live.ip_family_policy.clone());
    target.session_affinity = target
        .session_affinity
        .or_else(|| live.session_affinity.clone());
    target.internal_traffic_policy = target
        .internal_traffic_policy
        .or_else(|| live.internal_traffic_policy.clone());
    if same_type {
        target.external_traffic_policy = target
            .external_traffic_policy
            .or_else(|| live.external_traffic_policy.clone());
        target.health_check_node_port =
            target.health_check_node_port.or(live.health_check_node_port);
        target.allocate_load_balancer_node_ports = target
            .allocate_load_balancer_node_ports
            .or(live.allocate_load_balancer_node_ports);
    }

    for port in target.ports.iter_mut().flatten() {
        let Some(current) = live
            .ports
            .iter()
            .flatten()
            .find(|p| p.port == port.port && p.name == port.name)
        else {
            continue;
        };
        port.protocol = port.protocol.take().or_else(|| current.protocol.clone());
        port.target_port =
            port.target_port.take().or_else(|| current.target_port.clone());
        if same_type {
            port.node_port = port.node_port.or(current.node_port);
        }
    }

    if *live == target {
        return false;
    }
    *live = target;
    true
}

pub fn build_yurt_app_set(
    scope: &Scope<'_>,
    component: &ComponentSpec,
    deployment: &k8s_openapi::api::apps::v1::DeploymentSpec,
) -> YurtAppSet {
    let app_labels =
        BTreeMap::from([("app".to_string(), component.name.clone())]);
    let spec = YurtAppSetSpec {
        selector: Some(LabelSelector {
            match_labels: Some(app_labels.clone()),
            match_expressions: None,
        }),
        workload_template: WorkloadTemplate {
            deployment_template: Some(DeploymentTemplate {
                metadata: ObjectMeta {
                    labels: Some(app_labels),
                    ..Default::default()
                },
                spec: deployment.clone(),
            }),
            stateful_set_template: None,
        },
        topology: Topology {
            pools: vec![topology::pool_entry(scope.pool)],
        },
        revision_history_limit: None,
    };
    let mut yas = YurtAppSet::new(&component.name, spec);
    yas.metadata = generated_meta(scope, &component.name, GENERATE_DEPLOYMENT);
    yas
}

/// Ensure the Service for `component`. Components without exposed ports
/// have no Service.
#[instrument(skip_all, fields(component = %component.name))]
pub async fn ensure_service<S: ChildStore>(
    store: &S,
    scope: &Scope<'_>,
    component: &ComponentSpec,
) -> StoreResult<()> {
    let Some(spec) = component.exposed_service() else {
        return Ok(());
    };
    retry_on_conflict(scope.retry, "ensure_service", || {
        ensure_service_once(store, scope, &component.name, spec)
    })
    .await
}

async fn ensure_service_once<S: ChildStore>(
    store: &S,
    scope: &Scope<'_>,
    name: &str,
    spec: &ServiceSpec,
) -> StoreResult<()> {
    match store.get::<Service>(scope.ns, name).await? {
        None => {
            store
                .create(scope.ns, &build_service(scope, name, spec))
                .await?;
            info!(ns = %scope.ns, %name, "service created");
        }
        Some(mut svc) => {
            let mut changed = ensure_entry(
                &mut svc.metadata.labels,
                LABEL_EDGEX_GENERATE,
                GENERATE_SERVICE,
            );
            changed |= ensure_entry(
                &mut svc.metadata.annotations,
                ANNOTATION_TOPOLOGY_KEYS,
                TOPOLOGY_NODE_POOL,
            );
            changed |= add_owner(&mut svc.metadata, scope.parent);
            changed |=
                converge_service_spec(svc.spec.get_or_insert_with(Default::default), spec);
            if changed {
                store.replace(scope.ns, &svc).await?;
                debug!(ns = %scope.ns, %name, "service updated");
            }
        }
    }
    Ok(())
}

/// Ensure the YurtAppSet for `component` exists, carries an entry for the
/// parent's pool and lists the parent as an owner. The workload template of
/// an existing object is left as it is.
#[instrument(skip_all, fields(component = %component.name, pool = %scope.pool))]
pub async fn ensure_workload<S: ChildStore>(
    store: &S,
    scope: &Scope<'_>,
    component: &ComponentSpec,
) -> StoreResult<WorkloadOutcome> {
    let Some(deployment) = component.deployment.as_ref() else {
        return Ok(WorkloadOutcome::NotDesired);
    };
    retry_on_conflict(scope.retry, "ensure_workload", || {
        ensure_workload_once(store, scope, component, deployment)
    })
    .await
}

async fn ensure_workload_once<S: ChildStore>(
    store: &S,
    scope: &Scope<'_>,
    component: &ComponentSpec,
    deployment: &k8s_openapi::api::apps::v1::DeploymentSpec,
) -> StoreResult<WorkloadOutcome> {
    let name = component.name.as_str();
    match store.get::<YurtAppSet>(scope.ns, name).await? {
        None => {
            store
                .create(scope.ns, &build_yurt_app_set(scope, component, deployment))
                .await?;
            info!(ns = %scope.ns, %name, pool = %scope.pool, "yurtappset created");
            Ok(WorkloadOutcome::Created)
        }
        Some(live) => {
            let mut yas = live.clone();
            let mut changed = ensure_entry(
                &mut yas.metadata.labels,
                LABEL_EDGEX_GENERATE,
                GENERATE_DEPLOYMENT,
            );
            let joined = topology::ensure_pool(&mut yas.spec, scope.pool);
            changed |= joined;
            changed |= add_owner(&mut yas.metadata, scope.parent);
            if changed {
                store.replace(scope.ns, &yas).await?;
                if joined {
                    info!(ns = %scope.ns, %name, pool = %scope.pool, "pool added to yurtappset");
                } else {
                    debug!(ns = %scope.ns, %name, "yurtappset updated");
                }
            }
            Ok(WorkloadOutcome::Existing(Box::new(live)))
        }
    }
}

/// Ensure each catalog ConfigMap exists with the catalog data. Returns the
/// names that were ensured.
#[instrument(skip_all, fields(count = templates.len()))]
pub async fn ensure_config_maps<S: ChildStore>(
    store: &S,
    scope: &Scope<'_>,
    templates: &[ConfigMap],
) -> StoreResult<Vec<String>> {
    let mut names = Vec::with_capacity(templates.len());
    for template in templates {
        let Some(name) = template.metadata.name.as_deref() else {
            warn!("catalog config map without a name skipped");
            continue;
        };
        retry_on_conflict(scope.retry, "ensure_config_map", || {
            ensure_config_map_once(store, scope, name, template)
        })
        .await?;
        names.push(name.to_string());
    }
    Ok(names)
}

async fn ensure_config_map_once<S: ChildStore>(
    store: &S,
    scope: &Scope<'_>,
    name: &str,
    template: &ConfigMap,
) -> StoreResult<()> {
    match store.get::<ConfigMap>(scope.ns, name).await? {
        None => {
            let cm = ConfigMap {
                metadata: generated_meta(scope, name, GENERATE_CONFIGMAP),
                data: template.data.clone(),
                binary_data: template.binary_data.clone(),
                immutable: None,
            };
            store.create(scope.ns, &cm).await?;
            info!(ns = %scope.ns, %name, "configmap created");
        }
        Some(mut cm) => {
            let mut changed = ensure_entry(
                &mut cm.metadata.labels,
                LABEL_EDGEX_GENERATE,
                GENERATE_CONFIGMAP,
            );
            changed |= add_owner(&mut cm.metadata, scope.parent);
            if cm.data != template.data {
                cm.data = template.data.clone();
                changed = true;
            }
            if cm.binary_data != template.binary_data {
                cm.binary_data = template.binary_data.clone();
                changed = true;
            }
            if changed {
                store.replace(scope.ns, &cm).await?;
                debug!(ns = %scope.ns, %name, "configmap updated");
            }
        }
    }
    Ok(())
}

/// Remove the parent's pool entry from the YurtAppSet `name`. A missing
/// object has nothing to clean.
pub async fn release_pool<S: ChildStore>(
    store: &S,
    scope: &Scope<'_>,
    name: &str,
) -> StoreResult<()> {
    retry_on_conflict(scope.retry, "release_pool", || {
        release_pool_once(store, scope, name)
    })
    .await
}

async fn release_pool_once<S: ChildStore>(
    store: &S,
    scope: &Scope<'_>,
    name: &str,
) -> StoreResult<()> {
    let Some(mut yas) = store.get::<YurtAppSet>(scope.ns, name).await? else {
        debug!(ns = %scope.ns, %name, "yurtappset already gone");
        return Ok(());
    };
    if topology::remove_pool(&mut yas.spec, scope.pool) {
        match store.replace(scope.ns, &yas).await {
            Ok(_) => {
                info!(ns = %scope.ns, %name, pool = %scope.pool, "pool removed from yurtappset")
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::core::v1::ServicePort;

    fn parent(uid: &str) -> ParentRef {
        ParentRef {
            api_version: "device.openyurt.io/v1alpha2".into(),
            kind: "EdgeX".into(),
            name: format!("edgex-{uid}"),
            uid: uid.into(),
        }
    }

    fn component(name: &str) -> ComponentSpec {
        ComponentSpec {
            name: name.into(),
            service: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    port: 59881,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            deployment: Some(DeploymentSpec::default()),
        }
    }

    #[tokio::test]
    async fn service_is_created_with_marker_and_topology_annotation() {
        let store = MemoryStore::new();
        let p = parent("u1");
        let retry = RetryConfig::default();
        let scope = Scope { ns: "default", pool: "east", parent: &p, retry: &retry };

        ensure_service(&store, &scope, &component("edgex-core-metadata"))
            .await
            .unwrap();
        let svc: Service = store
            .get("default", "edgex-core-metadata")
            .await
            .unwrap()
            .unwrap();
        let labels = svc.metadata.labels.unwrap();
        assert_eq!(labels[LABEL_EDGEX_GENERATE], GENERATE_SERVICE);
        let ann = svc.metadata.annotations.unwrap();
        assert_eq!(ann[ANNOTATION_TOPOLOGY_KEYS], TOPOLOGY_NODE_POOL);
        assert_eq!(svc.metadata.owner_references.unwrap()[0].uid, "u1");
    }

    #[test]
    fn service_spec_keeps_allocated_fields() {
        let mut live = ServiceSpec {
            type_: Some("NodePort".into()),
            cluster_ip: Some("10.96.0.12".into()),
            cluster_ips: Some(vec!["10.96.0.12".into()]),
            session_affinity: Some("None".into()),
            ports: Some(vec![ServicePort {
                port: 59881,
                protocol: Some("TCP".into()),
                node_port: Some(30081),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let mut desired = component("x").service.unwrap();
        desired.type_ = Some("NodePort".into());
        assert!(!converge_service_spec(&mut live, &desired));
        assert_eq!(live.ports.as_ref().unwrap()[0].node_port, Some(30081));

        desired.type_ = Some("ClusterIP".into());
        assert!(converge_service_spec(&mut live, &desired));
        assert_eq!(live.type_.as_deref(), Some("ClusterIP"));
        assert_eq!(live.cluster_ip.as_deref(), Some("10.96.0.12"));
        assert_eq!(live.ports.as_ref().unwrap()[0].node_port, None);
    }

    #[test]
    fn service_spec_picks_up_new_ports() {
        let mut live = component("x").service.unwrap();
        let desired = ServiceSpec {
            ports: Some(vec![ServicePort {
                port: 59999,
                ..Default::default()
            }]),
            ..Default::default()
        };
        assert!(converge_service_spec(&mut live, &desired));
        assert_eq!(live.ports.unwrap()[0].port, 59999);
    }

    #[tokio::test]
    async fn portless_service_is_not_materialized() {
        let store = MemoryStore::new();
        let p = parent("u1");
        let retry = RetryConfig::default();
        let scope = Scope { ns: "default", pool: "east", parent: &p, retry: &retry };
        let mut c = component("edgex-security-proxy-setup");
        c.service = Some(ServiceSpec::default());

        ensure_service(&store, &scope, &c).await.unwrap();
        assert_eq!(store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn second_pool_joins_existing_yurt_app_set() {
        let store = MemoryStore::new();
        let retry = RetryConfig::default();
        let east = parent("u1");
        let west = parent("u2");
        let c = component("edgex-core-data");

        let s1 = Scope { ns: "default", pool: "east", parent: &east, retry: &retry };
        let first = ensure_workload(&store, &s1, &c).await.unwrap();
        assert!(matches!(first, WorkloadOutcome::Created));

        let s2 = Scope { ns: "default", pool: "west", parent: &west, retry: &retry };
        let second = ensure_workload(&store, &s2, &c).await.unwrap();
        let WorkloadOutcome::Existing(before) = second else {
            panic!("expected existing yurtappset");
        };
        assert_eq!(before.spec.topology.pools.len(), 1);

        let yas: YurtAppSet =
            store.get("default", "edgex-core-data").await.unwrap().unwrap();
        let pools: Vec<_> =
            yas.spec.topology.pools.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(pools, ["east", "west"]);
        assert_eq!(yas.metadata.owner_references.unwrap().len(), 2);

        let mutations = store.mutation_count();
        ensure_workload(&store, &s2, &c).await.unwrap();
        assert_eq!(store.mutation_count(), mutations);
    }

    #[tokio::test]
    async fn config_map_data_follows_catalog() {
        let store = MemoryStore::new();
        let p = parent("u1");
        let retry = RetryConfig::default();
        let scope = Scope { ns: "default", pool: "east", parent: &p, retry: &retry };
        let mut template = ConfigMap {
            metadata: ObjectMeta {
                name: Some("common-variables".into()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("SERVICE_HOST".into(), "0.0.0.0".into())])),
            ..Default::default()
        };
        ensure_config_maps(&store, &scope, std::slice::from_ref(&template))
            .await
            .unwrap();

        template.data = Some(BTreeMap::from([("SERVICE_HOST".into(), "edgex".into())]));
        let names = ensure_config_maps(&store, &scope, std::slice::from_ref(&template))
            .await
            .unwrap();
        assert_eq!(names, ["common-variables"]);
        let cm: ConfigMap =
            store.get("default", "common-variables").await.unwrap().unwrap();
        assert_eq!(cm.data, template.data);
    }

    #[tokio::test]
    async fn release_pool_tolerates_missing_workload() {
        let store = MemoryStore::new();
        let p = parent("u1");
        let retry = RetryConfig::default();
        let scope = Scope { ns: "default", pool: "east", parent: &p, retry: &retry };
        release_pool(&store, &scope, "edgex-core-data").await.unwrap();
    }
}
