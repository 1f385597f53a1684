use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::conditions;
use super::desired::{self, Desired};
use super::events::{REASON_READY, REASON_RECONCILE_FAILED, emit_event};
use super::gc;
use super::materialize::{self, Scope, WorkloadOutcome};
use super::ownership::ParentRef;
use super::readiness::{self, Readiness};
use super::{ControllerContext, ReconcileErr};
use crate::crd::edgex::{
    COMPONENT_PROVISIONING_FAILED_REASON, COMPONENT_PROVISIONING_REASON,
    CONFIGMAP_PROVISIONING_FAILED_REASON, ConditionSeverity, ConditionType,
    EDGEX_FINALIZER, EdgeX, EdgeXStatus, GENERATE_CONFIGMAP,
    GENERATE_DEPLOYMENT, GENERATE_SERVICE,
};
use crate::crd::yurt_app_set::YurtAppSet;
use crate::store::ChildStore;

/// Lifecycle state of an EdgeX as seen from its metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Not yet guarded by the finalizer.
    Initializing,
    Converging,
    /// Being deleted; children still have to be released.
    Deleting,
    /// Being deleted and already released.
    Gone,
}

pub fn phase_of(edgex: &EdgeX) -> Phase {
    let has_finalizer = edgex.finalizers().iter().any(|f| f == EDGEX_FINALIZER);
    match (edgex.meta().deletion_timestamp.is_some(), has_finalizer) {
        (false, false) => Phase::Initializing,
        (false, true) => Phase::Converging,
        (true, true) => Phase::Deleting,
        (true, false) => Phase::Gone,
    }
}

#[instrument(skip_all, fields(ns = %obj.namespace().unwrap_or_else(|| "default".into()), name = %obj.name_any()))]
pub async fn reconcile<S: ChildStore>(
    obj: Arc<EdgeX>,
    ctx: Arc<ControllerContext<S>>,
) -> Result<Action, ReconcileErr> {
    let ns = obj.namespace().unwrap_or_else(|| "default".to_string());
    let name = obj.name_any();

    match phase_of(&obj) {
        Phase::Gone => Ok(Action::await_change()),
        Phase::Initializing => {
            info!(%ns, %name, "reconcile: adding finalizer");
            let mut finals = obj.finalizers().to_vec();
            finals.push(EDGEX_FINALIZER.to_string());
            let patch = json!({"metadata": {"finalizers": finals}});
            ctx.store
                .merge_patch::<EdgeX>(&ns, &name, &patch)
                .await?;
            // The patch itself triggers the next pass.
            Ok(Action::await_change())
        }
        Phase::Deleting => {
            let res = reconcile_delete(&obj, &ctx, &ns, &name).await;
            if let Err(e) = &res {
                emit_event(
                    ctx.recorder.as_ref(),
                    &obj,
                    EventType::Warning,
                    REASON_RECONCILE_FAILED,
                    "Cleanup",
                    Some(e.to_string()),
                )
                .await;
            }
            res
        }
        Phase::Converging => {
            let before = obj.status.clone().unwrap_or_default();
            let mut status = before.clone();
            let res = reconcile_normal(&obj, &ctx, &ns, &mut status).await;

            conditions::set_summary(&mut status.conditions);
            status.observed_generation = obj.meta().generation;
            let persisted = persist_status(&ctx, &obj, &ns, &name, &status).await;

            match &res {
                Ok(_) if status.ready && !before.ready => {
                    emit_event(
                        ctx.recorder.as_ref(),
                        &obj,
                        EventType::Normal,
                        REASON_READY,
                        "Reconcile",
                        Some(format!(
                            "{} components ready in pool {}",
                            status.ready_component_num, obj.spec.pool_name
                        )),
                    )
                    .await;
                }
                Ok(_) => {}
                Err(e) => {
                    emit_event(
                        ctx.recorder.as_ref(),
                        &obj,
                        EventType::Warning,
                        REASON_RECONCILE_FAILED,
                        "Reconcile",
                        Some(e.to_string()),
                    )
                    .await;
                }
            }

            match (res, persisted) {
                (Err(e), Err(pe)) => {
                    warn!(%ns, %name, error = %pe, "status write failed after reconcile error");
                    Err(e)
                }
                (Err(e), Ok(())) => Err(e),
                (Ok(_), Err(pe)) => Err(pe),
                (Ok(action), Ok(())) => Ok(action),
            }
        }
    }
}

/// Converge children and fill `status`. Called only with the finalizer in
/// place; `status` is persisted by the caller whatever this returns.
async fn reconcile_normal<S: ChildStore>(
    obj: &EdgeX,
    ctx: &ControllerContext<S>,
    ns: &str,
    status: &mut EdgeXStatus,
) -> Result<Action, ReconcileErr> {
    status.initialized = true;

    let parent = ParentRef::from_edgex(obj)
        .ok_or_else(|| ReconcileErr::Internal("edgex has no uid".into()))?;
    let scope = Scope {
        ns,
        pool: &obj.spec.pool_name,
        parent: &parent,
        retry: &ctx.retry,
    };

    let desired = match desired::resolve(&ctx.catalog, obj) {
        Ok(d) => d,
        Err(e) => {
            warn!(%ns, error = %e, "reconcile: legacy annotations undecodable; children left untouched");
            status.ready = false;
            conditions::mark_false(
                &mut status.conditions,
                ConditionType::ComponentAvailable,
                COMPONENT_PROVISIONING_FAILED_REASON,
                ConditionSeverity::Warning,
                e.to_string(),
            );
            return Err(e.into());
        }
    };
    debug!(
        %ns,
        components = desired.components.len(),
        config_maps = desired.config_maps.len(),
        "reconcile: desired state resolved"
    );

    if let Err(e) = reconcile_config_maps(&ctx.store, &scope, &desired).await {
        status.ready = false;
        conditions::mark_false(
            &mut status.conditions,
            ConditionType::ConfigmapAvailable,
            CONFIGMAP_PROVISIONING_FAILED_REASON,
            ConditionSeverity::Warning,
            e.to_string(),
        );
        return Err(e);
    }
    conditions::mark_true(&mut status.conditions, ConditionType::ConfigmapAvailable);

    let readiness = match reconcile_components(&ctx.store, &scope, &desired).await {
        Ok(r) => r,
        Err(e) => {
            status.ready = false;
            conditions::mark_false(
                &mut status.conditions,
                ConditionType::ComponentAvailable,
                COMPONENT_PROVISIONING_FAILED_REASON,
                ConditionSeverity::Warning,
                e.to_string(),
            );
            return Err(e);
        }
    };

    status.ready_component_num = readiness.ready;
    status.unready_component_num = readiness.unready;
    status.ready = readiness.components_available;

    if readiness.components_available {
        conditions::mark_true(&mut status.conditions, ConditionType::ComponentAvailable);
        info!(%ns, ready = readiness.ready, "reconcile: all components ready");
        Ok(Action::requeue(ctx.cfg.resync()))
    } else {
        conditions::mark_false(
            &mut status.conditions,
            ConditionType::ComponentAvailable,
            COMPONENT_PROVISIONING_REASON,
            ConditionSeverity::Info,
            "",
        );
        debug!(%ns, ready = readiness.ready, unready = readiness.unready, "reconcile: components still rolling out");
        Ok(Action::requeue(ctx.cfg.requeue()))
    }
}

async fn reconcile_config_maps<S: ChildStore>(
    store: &S,
    scope: &Scope<'_>,
    desired: &Desired,
) -> Result<(), ReconcileErr> {
    materialize::ensure_config_maps(store, scope, &desired.config_maps).await?;
    let keep: HashSet<&str> = desired.config_map_names().collect();
    gc::sweep::<ConfigMap, S>(store, scope, GENERATE_CONFIGMAP, &keep).await?;
    Ok(())
}

async fn reconcile_components<S: ChildStore>(
    store: &S,
    scope: &Scope<'_>,
    desired: &Desired,
) -> Result<Readiness, ReconcileErr> {
    let mut live: HashMap<String, YurtAppSet> = HashMap::new();
    for component in &desired.components {
        materialize::ensure_service(store, scope, component).await?;
        if let WorkloadOutcome::Existing(yas) =
            materialize::ensure_workload(store, scope, component).await?
        {
            live.insert(component.name.clone(), *yas);
        }
    }

    let services: HashSet<&str> = desired.service_names().collect();
    gc::sweep::<Service, S>(store, scope, GENERATE_SERVICE, &services).await?;
    let workloads: HashSet<&str> = desired.workload_names().collect();
    gc::sweep::<YurtAppSet, S>(store, scope, GENERATE_DEPLOYMENT, &workloads).await?;

    Ok(readiness::aggregate(scope.pool, &desired.components, &live))
}

/// Release everything this EdgeX holds, then drop the finalizer.
async fn reconcile_delete<S: ChildStore>(
    obj: &EdgeX,
    ctx: &ControllerContext<S>,
    ns: &str,
    name: &str,
) -> Result<Action, ReconcileErr> {
    info!(%ns, %name, "reconcile: deletion requested; releasing children");
    let parent = ParentRef::from_edgex(obj)
        .ok_or_else(|| ReconcileErr::Internal("edgex has no uid".into()))?;
    let scope = Scope {
        ns,
        pool: &obj.spec.pool_name,
        parent: &parent,
        retry: &ctx.retry,
    };

    let desired = desired::resolve(&ctx.catalog, obj).unwrap_or_else(|e| {
        warn!(%ns, %name, error = %e, "reconcile: annotations undecodable during delete; using catalog only");
        desired::resolve_without_annotations(&ctx.catalog, obj)
    });

    for workload in desired.workload_names() {
        materialize::release_pool(&ctx.store, &scope, workload).await?;
    }

    let nothing = HashSet::new();
    gc::sweep::<Service, S>(&ctx.store, &scope, GENERATE_SERVICE, &nothing).await?;
    gc::sweep::<YurtAppSet, S>(&ctx.store, &scope, GENERATE_DEPLOYMENT, &nothing).await?;
    gc::sweep::<ConfigMap, S>(&ctx.store, &scope, GENERATE_CONFIGMAP, &nothing).await?;

    let finals: Vec<String> = obj
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != EDGEX_FINALIZER)
        .cloned()
        .collect();
    let patch = json!({"metadata": {"finalizers": finals}});
    match ctx.store.merge_patch::<EdgeX>(ns, name, &patch).await {
        Ok(_) => {}
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }
    info!(%ns, %name, "reconcile: finalizer removed");
    Ok(Action::await_change())
}

/// Write `status` when it differs from what the object already carries.
async fn persist_status<S: ChildStore>(
    ctx: &ControllerContext<S>,
    obj: &EdgeX,
    ns: &str,
    name: &str,
    status: &EdgeXStatus,
) -> Result<(), ReconcileErr> {
    if obj.status.as_ref() == Some(status) {
        debug!(%ns, %name, "reconcile: status unchanged; skipping write");
        return Ok(());
    }
    let patch = json!({ "status": status });
    ctx.store
        .merge_patch_status::<EdgeX>(ns, name, &patch)
        .await?;
    debug!(%ns, %name, ready = status.ready, "reconcile: status written");
    Ok(())
}
