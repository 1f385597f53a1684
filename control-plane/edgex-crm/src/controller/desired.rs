//! Desired state of one EdgeX: catalog entries for its version followed by
//! the decoded extensions, with the per-object overrides applied.

use k8s_openapi::api::core::v1::{ConfigMap, Container};

use crate::catalog::{Catalog, Variant};
use crate::crd::edgex::{ComponentSpec, EdgeX, EdgeXSpec};
use crate::legacy::{self, DecodeError};

/// Service type when neither the object nor the catalog names one.
pub const SERVICE_TYPE_CLUSTER_IP: &str = "ClusterIP";

#[derive(Clone, Debug, Default)]
pub struct Desired {
    pub components: Vec<ComponentSpec>,
    pub config_maps: Vec<ConfigMap>,
}

impl Desired {
    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.components
            .iter()
            .filter(|c| c.exposed_service().is_some())
            .map(|c| c.name.as_str())
    }

    pub fn workload_names(&self) -> impl Iterator<Item = &str> {
        self.components
            .iter()
            .filter(|c| c.deployment.is_some())
            .map(|c| c.name.as_str())
    }

    pub fn config_map_names(&self) -> impl Iterator<Item = &str> {
        self.config_maps
            .iter()
            .filter_map(|cm| cm.metadata.name.as_deref())
    }
}

pub fn resolve(
    catalog: &Catalog,
    edgex: &EdgeX,
) -> Result<Desired, DecodeError> {
    let extensions = legacy::decode(edgex)?;
    Ok(assemble(catalog, &edgex.spec, extensions))
}

/// Catalog entries plus the explicit list only. Used when the annotations
/// cannot be decoded but cleanup still has to make progress.
pub fn resolve_without_annotations(catalog: &Catalog, edgex: &EdgeX) -> Desired {
    assemble(catalog, &edgex.spec, edgex.spec.additional_components.clone())
}

fn assemble(
    catalog: &Catalog,
    spec: &EdgeXSpec,
    extensions: Vec<ComponentSpec>,
) -> Desired {
    let variant = Variant::from_security(spec.security);
    let mut components = catalog.lookup(variant, &spec.version).to_vec();
    components.extend(extensions);
    apply_overrides(&mut components, spec);
    Desired {
        components,
        config_maps: catalog.config_maps(variant, &spec.version).to_vec(),
    }
}

fn apply_overrides(components: &mut [ComponentSpec], spec: &EdgeXSpec) {
    let registry = spec
        .image_registry
        .as_deref()
        .map(|r| r.trim_end_matches('/'))
        .filter(|r| !r.is_empty());

    for c in components.iter_mut() {
        let image_override = spec
            .components
            .iter()
            .find(|o| o.name == c.name)
            .and_then(|o| o.image.as_deref());

        if let Some(pod) = c
            .deployment
            .as_mut()
            .and_then(|d| d.template.spec.as_mut())
        {
            if let Some(reg) = registry {
                for ctr in pod
                    .containers
                    .iter_mut()
                    .chain(pod.init_containers.iter_mut().flatten())
                {
                    rewrite_container_registry(ctr, reg);
                }
            }
            // An explicit image is taken verbatim.
            if let (Some(image), Some(first)) =
                (image_override, pod.containers.first_mut())
            {
                first.image = Some(image.to_string());
            }
        }

        if let Some(svc) = c.service.as_mut() {
            svc.type_ = spec
                .service_type
                .clone()
                .or_else(|| svc.type_.take())
                .or_else(|| Some(SERVICE_TYPE_CLUSTER_IP.to_string()));
        }
    }
}

fn rewrite_container_registry(ctr: &mut Container, registry: &str) {
    if let Some(image) = ctr.image.as_deref() {
        ctr.image = Some(with_registry(image, registry));
    }
}

/// Replace the registry host of `image`, or prefix one when it has none.
pub fn with_registry(image: &str, registry: &str) -> String {
    match image.split_once('/') {
        Some((host, rest)) if is_registry_host(host) => {
            format!("{registry}/{rest}")
        }
        _ => format!("{registry}/{image}"),
    }
}

fn is_registry_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}
