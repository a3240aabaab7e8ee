use anyhow::Result;
use sse_cluster::service::ApplicationBootstrap;
use sse_cluster::tracing::init_tracing_from_config;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SSE_CONFIG").ok());

    let loaded = sse_cluster::load_config(config_path.as_deref())?;
    let config = loaded.config;
    init_tracing_from_config(Some(&config.logging));
    for warning in &loaded.warnings {
        ::tracing::warn!("{}", warning);
    }

    ::tracing::info!(
        node_id = %config.node.id,
        port = config.node.port,
        "Starting SSE cluster node"
    );

    ApplicationBootstrap::run(config).await
}
