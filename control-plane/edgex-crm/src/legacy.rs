//! Decoding of the v1alpha1 compatibility carrier.
//!
//! v1alpha1 objects converted to v1alpha2 keep their extra Deployments and
//! Services as JSON lists in two annotations. [`decode`] folds those, plus the
//! structured `spec.additionalComponents`, into canonical [`ComponentSpec`]s.

use std::collections::{BTreeMap, HashMap};

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::crd::edgex::{ComponentSpec, EdgeX};
use crate::crd::edgex_v1alpha1::{DeploymentTemplateSpec, ServiceTemplateSpec};

pub const ANNOTATION_ADDITIONAL_DEPLOYMENTS: &str = "AdditionalDeployments";
pub const ANNOTATION_ADDITIONAL_SERVICES: &str = "AdditionalServices";

/// A stored annotation that cannot be parsed. Retrying does not help; the
/// descriptor has to be corrected.
#[derive(Debug, thiserror::Error)]
#[error("annotation {annotation} is malformed: {source}")]
pub struct DecodeError {
    pub annotation: &'static str,
    #[source]
    pub source: serde_json::Error,
}

/// Parse a JSON list stored under `key`. A missing annotation is an empty list.
pub fn parse_annotation<T: DeserializeOwned>(
    annotations: &BTreeMap<String, String>,
    key: &'static str,
) -> Result<Vec<T>, DecodeError> {
    match annotations.get(key) {
        None => Ok(Vec::new()),
        Some(raw) => serde_json::from_str(raw).map_err(|source| DecodeError {
            annotation: key,
            source,
        }),
    }
}

/// Extension components of `edgex`: annotation-decoded ones first, then
/// `spec.additionalComponents` in order.
pub fn decode(edgex: &EdgeX) -> Result<Vec<ComponentSpec>, DecodeError> {
    let annotations = edgex.metadata.annotations.clone().unwrap_or_default();
    let deployments: Vec<DeploymentTemplateSpec> =
        parse_annotation(&annotations, ANNOTATION_ADDITIONAL_DEPLOYMENTS)?;
    let services: Vec<ServiceTemplateSpec> =
        parse_annotation(&annotations, ANNOTATION_ADDITIONAL_SERVICES)?;

    let mut out = merge_fragments(deployments, services);
    out.extend(edgex.spec.additional_components.iter().cloned());
    Ok(out)
}

/// Pair workload and exposure fragments by name. Workload-bearing components
/// come first in source order, then exposure-only ones in source order.
fn merge_fragments(
    deployments: Vec<DeploymentTemplateSpec>,
    services: Vec<ServiceTemplateSpec>,
) -> Vec<ComponentSpec> {
    let mut out: Vec<ComponentSpec> = Vec::with_capacity(deployments.len());
    let mut by_name: HashMap<String, usize> = HashMap::new();

    for d in deployments {
        let Some(name) = d.metadata.name.filter(|n| !n.is_empty()) else {
            warn!("legacy: skipping deployment fragment without a name");
            continue;
        };
        if let Some(&idx) = by_name.get(&name) {
            debug!(%name, "legacy: duplicate deployment fragment replaces the earlier one");
            out[idx].deployment = Some(d.spec);
            continue;
        }
        by_name.insert(name.clone(), out.len());
        out.push(ComponentSpec {
            name,
            service: None,
            deployment: Some(d.spec),
        });
    }

    for s in services {
        let Some(name) = s.metadata.name.filter(|n| !n.is_empty()) else {
            warn!("legacy: skipping service fragment without a name");
            continue;
        };
        // later fragments for the same name win
        match by_name.get(&name) {
            Some(&idx) => out[idx].service = Some(s.spec),
            None => {
                by_name.insert(name.clone(), out.len());
                out.push(ComponentSpec {
                    name,
                    service: Some(s.spec),
                    deployment: None,
                });
            }
        }
    }
    out
}
