//! topicboard server
//!
//! Runs the fan-out hub behind an HTTP/websocket listener.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use topicboard::api::{serve, AppState};
use topicboard::codec::SchemaRegistry;
use topicboard::config::{generate_default_config, Config, LoggingConfig};
use topicboard::hub::Hub;
use topicboard::source::{spawn_demo_publisher, MemorySource, VirtualTopics};

#[derive(Parser, Debug)]
#[command(name = "topicboard", version, about = "Real-time telemetry fan-out hub")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Publish synthetic demo topics
    #[arg(long)]
    demo: bool,

    /// Print a default config file and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_default(),
    };
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    init_logging(&config.logging);

    tracing::info!("topicboard v{}", env!("CARGO_PKG_VERSION"));

    let mut schemas = SchemaRegistry::with_common_types();
    for path in &config.schemas.paths {
        let loaded = schemas
            .load_file(path)
            .with_context(|| format!("Failed to load schemas from {}", path.display()))?;
        tracing::info!(path = %path.display(), schemas = loaded, "Loaded schema file");
    }

    let source = Arc::new(MemorySource::with_capacity(
        "memory",
        schemas,
        config.hub.feed_capacity,
    ));
    let demo = cli
        .demo
        .then(|| spawn_demo_publisher(Arc::clone(&source)));

    let hub = Arc::new(Hub::new(
        config.hub_config(),
        source,
        VirtualTopics::builtin(),
    ));
    let tasks = hub.start();

    let result = serve(AppState::new(Arc::clone(&hub), config.api_config())).await;

    if let Some(demo) = demo {
        demo.abort();
    }
    hub.shutdown(tasks).await;
    tracing::info!("topicboard shutdown complete");

    result.context("HTTP server failed")
}

fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("topicboard={}", logging.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
