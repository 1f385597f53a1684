//! The version → components table.
//!
//! Loaded once at startup from the packaged manifests (or a directory holding
//! files of the same names) and shared read-only afterwards.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use k8s_openapi::api::core::v1::ConfigMap;
use serde::Deserialize;
use tracing::debug;

use crate::crd::edgex::ComponentSpec;

pub const STANDARD_MANIFEST: &str = "config.yaml";
pub const SECURE_MANIFEST: &str = "config-security.yaml";

const BUILTIN_STANDARD: &str = include_str!("../../manifest/config.yaml");
const BUILTIN_SECURE: &str = include_str!("../../manifest/config-security.yaml");

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("version {version} listed twice in {file}")]
    DuplicateVersion { file: String, version: String },
}

/// Which manifest a descriptor draws from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Variant {
    Standard,
    Secure,
}

impl Variant {
    pub fn from_security(security: bool) -> Self {
        if security {
            Variant::Secure
        } else {
            Variant::Standard
        }
    }
}

#[derive(Deserialize, Debug, Default)]
struct Manifest {
    #[serde(default)]
    versions: Vec<ManifestVersion>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ManifestVersion {
    version_name: String,
    #[serde(default)]
    config_maps: Vec<ConfigMap>,
    #[serde(default)]
    components: Vec<ComponentSpec>,
}

#[derive(Clone, Debug, Default)]
struct VersionEntry {
    components: Vec<ComponentSpec>,
    config_maps: Vec<ConfigMap>,
}

#[derive(Clone, Debug, Default)]
pub struct Catalog {
    entries: HashMap<(Variant, String), VersionEntry>,
}

impl Catalog {
    /// The manifests compiled into the binary.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_manifests(BUILTIN_STANDARD, BUILTIN_SECURE)
    }

    /// Read `config.yaml` and `config-security.yaml` from `dir`.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let dir = dir.as_ref();
        let read = |file: &str| {
            let path = dir.join(file);
            std::fs::read_to_string(&path)
                .map_err(|source| CatalogError::Io { path, source })
        };
        Self::from_manifests(&read(STANDARD_MANIFEST)?, &read(SECURE_MANIFEST)?)
    }

    pub fn from_manifests(
        standard: &str,
        secure: &str,
    ) -> Result<Self, CatalogError> {
        let mut catalog = Catalog::default();
        catalog.load(Variant::Standard, STANDARD_MANIFEST, standard)?;
        catalog.load(Variant::Secure, SECURE_MANIFEST, secure)?;
        Ok(catalog)
    }

    fn load(
        &mut self,
        variant: Variant,
        file: &str,
        raw: &str,
    ) -> Result<(), CatalogError> {
        let manifest: Manifest =
            serde_yaml::from_str(raw).map_err(|source| CatalogError::Parse {
                file: file.to_string(),
                source,
            })?;
        for v in manifest.versions {
            let key = (variant, v.version_name);
            if self.entries.contains_key(&key) {
                return Err(CatalogError::DuplicateVersion {
                    file: file.to_string(),
                    version: key.1,
                });
            }
            debug!(
                ?variant,
                version = %key.1,
                components = v.components.len(),
                config_maps = v.config_maps.len(),
                "catalog: loaded version"
            );
            self.entries.insert(
                key,
                VersionEntry {
                    components: v.components,
                    config_maps: v.config_maps,
                },
            );
        }
        Ok(())
    }

    /// Register a version directly. Replaces any previous entry.
    pub fn with_version(
        mut self,
        variant: Variant,
        version: &str,
        components: Vec<ComponentSpec>,
        config_maps: Vec<ConfigMap>,
    ) -> Self {
        self.entries.insert(
            (variant, version.to_string()),
            VersionEntry {
                components,
                config_maps,
            },
        );
        self
    }

    /// Components of `version`, in manifest order. Unknown versions desire
    /// nothing.
    pub fn lookup(&self, variant: Variant, version: &str) -> &[ComponentSpec] {
        self.entry(variant, version)
            .map(|e| e.components.as_slice())
            .unwrap_or_default()
    }

    pub fn config_maps(&self, variant: Variant, version: &str) -> &[ConfigMap] {
        self.entry(variant, version)
            .map(|e| e.config_maps.as_slice())
            .unwrap_or_default()
    }

    /// Known versions of a variant, sorted.
    pub fn versions(&self, variant: Variant) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .entries
            .keys()
            .filter(|(v, _)| *v == variant)
            .map(|(_, name)| name.as_str())
            .collect();
        out.sort_unstable();
        out
    }

    fn entry(&self, variant: Variant, version: &str) -> Option<&VersionEntry> {
        self.entries.get(&(variant, version.to_string()))
    }
}
