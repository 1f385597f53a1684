pub mod conditions;
pub mod desired;
pub mod events;
pub mod gc;
pub mod materialize;
pub mod ownership;
pub mod readiness;
mod reconcile;
pub mod retry;
pub mod topology;

pub use reconcile::{Phase, phase_of, reconcile};

use std::sync::Arc;

use futures_util::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::{
    Client,
    api::Api,
    runtime::{
        Controller,
        controller::{self, Action},
        events::Recorder,
        watcher,
    },
};
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::{CrmConfig, ReconcileConfig};
use crate::crd::edgex::LABEL_EDGEX_GENERATE;
use crate::crd::{EdgeX, YurtAppSet};
use crate::legacy::DecodeError;
use crate::store::{ChildStore, KubeStore, StoreError};
use retry::RetryConfig;

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ReconcileErr {
    /// Errors that another attempt with the same input cannot fix.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ReconcileErr::Decode(_))
    }
}

pub struct ControllerContext<S> {
    pub store: S,
    pub catalog: Arc<Catalog>,
    pub cfg: ReconcileConfig,
    pub retry: RetryConfig,
    pub recorder: Option<Recorder>,
}

impl<S: ChildStore> ControllerContext<S> {
    pub fn new(store: S, catalog: Arc<Catalog>, cfg: ReconcileConfig) -> Self {
        let retry = RetryConfig::with_max_attempts(cfg.conflict_attempts);
        Self {
            store,
            catalog,
            cfg,
            retry,
            recorder: None,
        }
    }

    pub fn with_recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = Some(recorder);
        self
    }
}

pub fn error_policy<S: ChildStore>(
    obj: Arc<EdgeX>,
    error: &ReconcileErr,
    ctx: Arc<ControllerContext<S>>,
) -> Action {
    let name = obj.metadata.name.as_deref().unwrap_or_default();
    if error.is_permanent() {
        warn!(%name, error = %error, "reconcile failed permanently; waiting for a change");
        Action::await_change()
    } else {
        warn!(%name, error = %error, "reconcile failed; requeueing");
        Action::requeue(ctx.cfg.error_requeue())
    }
}

fn scoped_api<K>(client: &Client, ns: Option<&str>) -> Api<K>
where
    K: kube::Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>,
{
    match ns {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Run the EdgeX controller until shutdown. `ready` flips once the watches
/// are set up.
pub async fn run_controller(
    client: Client,
    cfg: &CrmConfig,
    catalog: Arc<Catalog>,
    ready: crate::web::Readiness,
) -> anyhow::Result<()> {
    let ns = cfg.watch_namespace.as_deref();
    let edgexes: Api<EdgeX> = scoped_api(&client, ns);
    let services: Api<Service> = scoped_api(&client, ns);
    let config_maps: Api<ConfigMap> = scoped_api(&client, ns);
    let yurt_app_sets: Api<YurtAppSet> = scoped_api(&client, ns);

    let mut ctx = ControllerContext::new(
        KubeStore::new(client.clone()),
        catalog,
        cfg.reconcile.clone(),
    );
    if cfg.events_enabled {
        ctx = ctx.with_recorder(Recorder::new(client.clone(), "edgex-crm".into()));
    }
    let ctx = Arc::new(ctx);

    let generated = watcher::Config::default().labels(LABEL_EDGEX_GENERATE);
    info!(namespace = ?ns, concurrency = cfg.reconcile.concurrency, "starting edgex controller");

    let reconciled = Controller::new(edgexes, watcher::Config::default())
        .owns(services, generated.clone())
        .owns(config_maps, generated.clone())
        .owns(yurt_app_sets, generated)
        .with_config(
            controller::Config::default().concurrency(cfg.reconcile.concurrency),
        )
        .shutdown_on_signal()
        .run(reconcile::<KubeStore>, error_policy::<KubeStore>, ctx);
    ready.mark_ready();

    reconciled
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => {
                    debug!(object = %obj_ref, ?action, "reconciled")
                }
                Err(e) => debug!(error = %e, "reconcile dispatch error"),
            }
        })
        .await;

    info!("edgex controller stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn conflict_attempts_bound_total_tries() {
        let cfg = ReconcileConfig {
            conflict_attempts: 2,
            ..Default::default()
        };
        let ctx = ControllerContext::new(MemoryStore::new(), Arc::new(Catalog::default()), cfg);
        assert_eq!(ctx.retry.max_attempts, 2);

        let cfg = ReconcileConfig {
            conflict_attempts: 0,
            ..Default::default()
        };
        let ctx = ControllerContext::new(MemoryStore::new(), Arc::new(Catalog::default()), cfg);
        assert_eq!(ctx.retry.max_attempts, 1);
    }
}
