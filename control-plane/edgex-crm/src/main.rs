use edgex_crm::{config::CrmConfig, init_tracing, runtime};
use envconfig::Envconfig;
use kube::Client;
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    let cfg = CrmConfig::init_from_env()?;
    info!(?cfg, "Starting EdgeX CRM");

    let client = Client::try_default().await?;
    runtime::run_all(client, cfg).await
}
