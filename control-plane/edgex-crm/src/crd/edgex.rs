use k8s_openapi::api::apps::v1::DeploymentSpec;
use k8s_openapi::api::core::v1::ServiceSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Finalizer guarding child cleanup before an EdgeX is removed.
pub const EDGEX_FINALIZER: &str = "edgex.edgexfoundry.org";

/// Generation-marker label carried by every child this controller produces.
pub const LABEL_EDGEX_GENERATE: &str = "www.edgexfoundry.org/generate";

/// Marker values, one per child kind so sweeps can be scoped.
pub const GENERATE_CONFIGMAP: &str = "Configmap";
pub const GENERATE_SERVICE: &str = "Service";
pub const GENERATE_DEPLOYMENT: &str = "Deployment";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "device.openyurt.io",
    version = "v1alpha2",
    kind = "EdgeX",
    plural = "edgexes",
    shortname = "edgex",
    namespaced,
    status = "EdgeXStatus",
    printcolumn = r#"{"name":"READY", "type":"boolean", "jsonPath":".status.ready", "description":"The edgex ready status"}"#,
    printcolumn = r#"{"name":"ReadyComponentNum", "type":"integer", "jsonPath":".status.readyComponentNum", "description":"The Ready Component."}"#,
    printcolumn = r#"{"name":"UnreadyComponentNum", "type":"integer", "jsonPath":".status.unreadyComponentNum", "description":"The Unready Component."}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EdgeXSpec {
    /// Bundle version, a key into the component catalog (e.g. "jakarta")
    #[serde(default)]
    pub version: String,
    /// Registry host substituted into every generated container image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_registry: Option<String>,
    /// The single node pool this instance is deployed onto
    #[serde(default)]
    pub pool_name: String,
    /// Per-component image overrides
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentOverride>,
    /// Select the secure catalog variant
    #[serde(default)]
    pub security: bool,
    /// Service type applied to every generated Service (ClusterIP when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    /// Components appended after the catalog entries for this version
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_components: Vec<ComponentSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentOverride {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// One named unit of the bundle. Either side may be absent; a component with
/// neither produces no children.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ComponentSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentSpec>,
}

impl ComponentSpec {
    /// A service with no ports exposes nothing and is not materialized.
    pub fn exposed_service(&self) -> Option<&ServiceSpec> {
        self.service
            .as_ref()
            .filter(|s| s.ports.as_ref().is_some_and(|p| !p.is_empty()))
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EdgeXStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub initialized: bool,
    #[serde(default)]
    pub ready_component_num: i32,
    #[serde(default)]
    pub unready_component_num: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<ConditionSeverity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        rename = "lastTransitionTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_transition_time: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionType {
    Ready,
    ConfigmapAvailable,
    ComponentAvailable,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionSeverity {
    Error,
    Warning,
    Info,
}

// Condition reasons
pub const CONFIGMAP_PROVISIONING_REASON: &str = "ConfigmapProvisioning";
pub const CONFIGMAP_PROVISIONING_FAILED_REASON: &str =
    "ConfigmapProvisioningFailed";
pub const COMPONENT_PROVISIONING_REASON: &str = "ComponentProvisioning";
pub const COMPONENT_PROVISIONING_FAILED_REASON: &str =
    "ComponentProvisioningFailed";
