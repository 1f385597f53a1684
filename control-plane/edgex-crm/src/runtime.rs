use std::net::SocketAddr;
use std::sync::Arc;

use kube::Client;
use tokio::{task::JoinHandle, try_join};
use tracing::info;

use crate::{
    catalog::{Catalog, Variant},
    config::CrmConfig,
    controller::run_controller,
    web::{Readiness, run_http_server},
};

/// Compute the HTTP bind address based on config.
pub fn compute_http_addr(cfg: &CrmConfig) -> SocketAddr {
    ([0, 0, 0, 0], cfg.http_port).into()
}

/// Load the catalog from `EDGEX_CRM_CATALOG_DIR`, or the built-in manifests.
pub fn load_catalog(cfg: &CrmConfig) -> anyhow::Result<Catalog> {
    let catalog = match cfg.catalog_dir.as_deref() {
        Some(dir) => Catalog::load_dir(dir)?,
        None => Catalog::builtin()?,
    };
    info!(
        standard = ?catalog.versions(Variant::Standard),
        secure = ?catalog.versions(Variant::Secure),
        source = cfg.catalog_dir.as_deref().unwrap_or("builtin"),
        "catalog loaded"
    );
    Ok(catalog)
}

/// Spawn the Kubernetes controller loop.
pub fn spawn_controller(
    client: Client,
    cfg: CrmConfig,
    catalog: Arc<Catalog>,
    ready: Readiness,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move { run_controller(client, &cfg, catalog, ready).await })
}

pub fn spawn_http(
    addr: SocketAddr,
    ready: Readiness,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move { run_http_server(addr, ready).await })
}

/// Start the controller and the HTTP server and wait until either finishes.
pub async fn run_all(client: Client, cfg: CrmConfig) -> anyhow::Result<()> {
    let catalog = Arc::new(load_catalog(&cfg)?);
    let http_addr = compute_http_addr(&cfg);
    let ready = Readiness::default();

    let controller =
        spawn_controller(client, cfg.clone(), catalog, ready.clone());
    let http = spawn_http(http_addr, ready);

    let (c_res, h_res) = try_join!(controller, http)?;
    c_res?;
    h_res?;
    Ok(())
}
