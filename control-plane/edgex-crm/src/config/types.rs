use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct CrmConfig {
    #[envconfig(from = "HTTP_PORT", default = "8081")]
    pub http_port: u16,

    /// Restrict the watch to one namespace; all namespaces when unset.
    /// Env: EDGEX_CRM_WATCH_NAMESPACE
    #[envconfig(from = "EDGEX_CRM_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Directory holding config.yaml / config-security.yaml. The manifests
    /// built into the binary are used when unset.
    /// Env: EDGEX_CRM_CATALOG_DIR
    #[envconfig(from = "EDGEX_CRM_CATALOG_DIR")]
    pub catalog_dir: Option<String>,

    #[envconfig(from = "EDGEX_CRM_EVENTS", default = "true")]
    pub events_enabled: bool,

    #[envconfig(nested)]
    pub reconcile: ReconcileConfig,
}

#[derive(Envconfig, Clone, Debug)]
pub struct ReconcileConfig {
    /// Re-check interval while components are still rolling out
    #[envconfig(from = "EDGEX_CRM_REQUEUE_SECS", default = "10")]
    pub requeue_secs: u64,
    /// Periodic resync once everything is ready
    #[envconfig(from = "EDGEX_CRM_RESYNC_SECS", default = "300")]
    pub resync_secs: u64,
    #[envconfig(from = "EDGEX_CRM_ERROR_REQUEUE_SECS", default = "30")]
    pub error_requeue_secs: u64,
    /// Attempts per read-modify-write before a conflict is surfaced
    #[envconfig(from = "EDGEX_CRM_CONFLICT_ATTEMPTS", default = "5")]
    pub conflict_attempts: u32,
    #[envconfig(from = "EDGEX_CRM_CONCURRENCY", default = "4")]
    pub concurrency: u16,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            requeue_secs: 10,
            resync_secs: 300,
            error_requeue_secs: 30,
            conflict_attempts: 5,
            concurrency: 4,
        }
    }
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            http_port: 8081,
            watch_namespace: None,
            catalog_dir: None,
            events_enabled: true,
            reconcile: ReconcileConfig::default(),
        }
    }
}

impl ReconcileConfig {
    pub fn requeue(&self) -> Duration {
        Duration::from_secs(self.requeue_secs)
    }

    pub fn resync(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }

    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }
}
