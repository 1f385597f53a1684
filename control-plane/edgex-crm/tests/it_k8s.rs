// Integration tests that expect a running cluster with the EdgeX and
// YurtAppSet CRDs installed.
// Enable via: cargo test -p edgex-crm --test it_k8s -- --ignored

use std::sync::Arc;

use edgex_crm::config::ReconcileConfig;
use edgex_crm::controller::{ControllerContext, reconcile};
use edgex_crm::crd::EdgeX;
use edgex_crm::crd::YurtAppSet;
use edgex_crm::store::KubeStore;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;

mod common;
use common::{catalog, component, spec, uniq};

async fn context() -> (Client, Arc<ControllerContext<KubeStore>>) {
    let client = Client::try_default().await.expect("kube client");
    let ctx = ControllerContext::new(
        KubeStore::new(client.clone()),
        Arc::new(catalog(&[("jakarta", vec![component("it-core-data", 59880)])])),
        ReconcileConfig::default(),
    );
    (client, Arc::new(ctx))
}

async fn pass(api: &Api<EdgeX>, name: &str, ctx: &Arc<ControllerContext<KubeStore>>) {
    let obj = api.get(name).await.expect("get edgex");
    reconcile(Arc::new(obj), ctx.clone()).await.expect("reconcile");
}

#[test_log::test(tokio::test)]
#[ignore]
async fn reconcile_and_release_in_cluster() {
    // Pre-conditions:
    // - KUBECONFIG points to a working cluster
    // - EdgeX (device.openyurt.io) and YurtAppSet (apps.openyurt.io) CRDs installed
    // - Namespace "default" exists
    let (client, ctx) = context().await;
    let ns = "default";
    let name = uniq("edgex-it");

    let edgexes: Api<EdgeX> = Api::namespaced(client.clone(), ns);
    edgexes
        .create(&PostParams::default(), &EdgeX::new(&name, spec("jakarta", "it-pool")))
        .await
        .expect("create edgex");

    // finalizer pass, then the converging pass
    pass(&edgexes, &name, &ctx).await;
    pass(&edgexes, &name, &ctx).await;

    let services: Api<Service> = Api::namespaced(client.clone(), ns);
    let workloads: Api<YurtAppSet> = Api::namespaced(client.clone(), ns);
    assert!(services.get_opt("it-core-data").await.unwrap().is_some());
    let yas = workloads.get("it-core-data").await.expect("yurtappset");
    assert!(yas.spec.topology.pools.iter().any(|p| p.name == "it-pool"));

    edgexes
        .delete(&name, &DeleteParams::default())
        .await
        .expect("delete edgex");
    pass(&edgexes, &name, &ctx).await;

    assert!(edgexes.get_opt(&name).await.unwrap().is_none());
    assert!(services.get_opt("it-core-data").await.unwrap().is_none());
}

#[test_log::test(tokio::test)]
#[ignore]
async fn readiness_flips_once_controller_runs() {
    use edgex_crm::catalog::Catalog;
    use edgex_crm::config::CrmConfig;
    use edgex_crm::controller::run_controller;
    use edgex_crm::web::Readiness;

    let client = Client::try_default().await.expect("kube client");
    let cfg = CrmConfig {
        watch_namespace: Some("default".into()),
        events_enabled: false,
        ..Default::default()
    };
    let ready = Readiness::default();
    assert!(!ready.is_ready());

    let handle = tokio::spawn({
        let ready = ready.clone();
        async move {
            run_controller(client, &cfg, Arc::new(Catalog::default()), ready).await
        }
    });
    for _ in 0..50 {
        if ready.is_ready() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    assert!(ready.is_ready());
    handle.abort();
}
