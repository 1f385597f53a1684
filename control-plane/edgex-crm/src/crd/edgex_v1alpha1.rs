//! The served-but-deprecated `v1alpha1` EdgeX shape.
//!
//! v1alpha1 carried extra Services and Deployments as explicit lists. v1alpha2
//! has no such fields, so converting down stashes them as JSON in the
//! `AdditionalServices` / `AdditionalDeployments` annotations, which the
//! legacy decoder reads back during reconciliation.
//!
//! [`to_v1alpha2`] and [`from_v1alpha2`] are library functions for whatever
//! conversion webhook fronts the CRD; this binary serves no conversion
//! endpoint itself.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::DeploymentSpec;
use k8s_openapi::api::core::v1::ServiceSpec;
use kube::CustomResource;
use kube::core::ObjectMeta;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::edgex::{Condition, EdgeX as EdgeXV2, EdgeXSpec as EdgeXSpecV2, EdgeXStatus as EdgeXStatusV2};
use crate::legacy::{
    ANNOTATION_ADDITIONAL_DEPLOYMENTS, ANNOTATION_ADDITIONAL_SERVICES,
    DecodeError, parse_annotation,
};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "device.openyurt.io",
    version = "v1alpha1",
    kind = "EdgeX",
    plural = "edgexes",
    shortname = "edgex",
    namespaced,
    status = "EdgeXStatus",
    printcolumn = r#"{"name":"READY", "type":"boolean", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Service", "type":"integer", "jsonPath":".status.serviceReplicas"}"#,
    printcolumn = r#"{"name":"ReadyService", "type":"integer", "jsonPath":".status.serviceReadyReplicas"}"#,
    printcolumn = r#"{"name":"Deployment", "type":"integer", "jsonPath":".status.deploymentReplicas"}"#,
    printcolumn = r#"{"name":"ReadyDeployment", "type":"integer", "jsonPath":".status.deploymentReadyReplicas"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EdgeXSpec {
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_registry: Option<String>,
    #[serde(default)]
    pub pool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_services: Vec<ServiceTemplateSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_deployments: Vec<DeploymentTemplateSpec>,
}

/// A Deployment fragment keyed by `metadata.name`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct DeploymentTemplateSpec {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: DeploymentSpec,
}

/// A Service fragment keyed by `metadata.name`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ServiceTemplateSpec {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: ServiceSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EdgeXStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub initialized: bool,
    #[serde(default)]
    pub service_replicas: i32,
    #[serde(default)]
    pub service_ready_replicas: i32,
    #[serde(default)]
    pub deployment_replicas: i32,
    #[serde(default)]
    pub deployment_ready_replicas: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Convert a v1alpha1 object to v1alpha2, moving the additional lists into
/// the legacy annotations.
pub fn to_v1alpha2(src: &EdgeX) -> Result<EdgeXV2, serde_json::Error> {
    let mut metadata = src.metadata.clone();
    let annotations = metadata.annotations.get_or_insert_with(BTreeMap::new);
    if !src.spec.additional_deployments.is_empty() {
        annotations.insert(
            ANNOTATION_ADDITIONAL_DEPLOYMENTS.to_string(),
            serde_json::to_string(&src.spec.additional_deployments)?,
        );
    }
    if !src.spec.additional_services.is_empty() {
        annotations.insert(
            ANNOTATION_ADDITIONAL_SERVICES.to_string(),
            serde_json::to_string(&src.spec.additional_services)?,
        );
    }
    if annotations.is_empty() {
        metadata.annotations = None;
    }

    let spec = EdgeXSpecV2 {
        version: src.spec.version.clone(),
        image_registry: src.spec.image_registry.clone(),
        pool_name: src.spec.pool_name.clone(),
        security: false,
        service_type: src.spec.service_type.clone(),
        ..Default::default()
    };
    let status = src.status.as_ref().map(|s| EdgeXStatusV2 {
        ready: s.ready,
        initialized: s.initialized,
        ready_component_num: s.deployment_ready_replicas,
        unready_component_num: s.deployment_replicas
            - s.deployment_ready_replicas,
        observed_generation: None,
        conditions: s.conditions.clone(),
    });
    Ok(EdgeXV2 {
        metadata,
        spec,
        status,
    })
}

/// Convert a v1alpha2 object back to v1alpha1, recovering the additional
/// lists from the legacy annotations.
pub fn from_v1alpha2(src: &EdgeXV2) -> Result<EdgeX, DecodeError> {
    let mut metadata = src.metadata.clone();
    let annotations = metadata.annotations.clone().unwrap_or_default();
    let additional_deployments: Vec<DeploymentTemplateSpec> =
        parse_annotation(&annotations, ANNOTATION_ADDITIONAL_DEPLOYMENTS)?;
    let additional_services: Vec<ServiceTemplateSpec> =
        parse_annotation(&annotations, ANNOTATION_ADDITIONAL_SERVICES)?;
    if let Some(ann) = metadata.annotations.as_mut() {
        ann.remove(ANNOTATION_ADDITIONAL_DEPLOYMENTS);
        ann.remove(ANNOTATION_ADDITIONAL_SERVICES);
        if ann.is_empty() {
            metadata.annotations = None;
        }
    }

    let spec = EdgeXSpec {
        version: src.spec.version.clone(),
        image_registry: src.spec.image_registry.clone(),
        pool_name: src.spec.pool_name.clone(),
        service_type: Some(
            src.spec
                .service_type
                .clone()
                .unwrap_or_else(|| "ClusterIP".to_string()),
        ),
        additional_services,
        additional_deployments,
    };
    let status = src.status.as_ref().map(|s| {
        let total = s.ready_component_num + s.unready_component_num;
        EdgeXStatus {
            ready: s.ready,
            initialized: s.initialized,
            service_replicas: total,
            service_ready_replicas: s.ready_component_num,
            deployment_replicas: total,
            deployment_ready_replicas: s.ready_component_num,
            conditions: s.conditions.clone(),
        }
    });
    Ok(EdgeX {
        metadata,
        spec,
        status,
    })
}
