use clap::Parser;
use factory_gateway::{build_router, AppState, GatewayConfig, KeyRing, SharedLogger};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "factory-gateway",
    about = "Protocol-translation gateway bridging OpenAI-format clients to the Factory LLM backends",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log file path
    #[arg(long, default_value = "factory-gateway.log")]
    log_file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "factory_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = GatewayConfig::find_and_load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    let logger = SharedLogger::new(&cli.log_file)?;
    let keys = Arc::new(KeyRing::from_access(
        config.upstream.api_keys.clone(),
        &config.access,
    ));

    info!("factory-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("  Upstream:     {}", config.upstream.base_url);
    info!("  Pool keys:    {}", config.upstream.api_keys.len());
    info!("  Proxy keys:   {}", config.access.proxy_keys.len());
    info!("  Key header:   {}", config.access.proxy_key_header);
    info!("  Port:         {}", config.port);
    info!("  Log file:     {}", cli.log_file.display());

    logger.info(
        "startup",
        format!(
            "starting factory-gateway base_url={} port={}",
            config.upstream.base_url, config.port
        ),
    );

    // No per-request timeout: streams may legitimately run for minutes.
    let client = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(15))
        .build()?;

    let state = Arc::new(AppState {
        config: config.clone(),
        client,
        keys,
        logger,
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
