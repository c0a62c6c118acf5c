use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use guide_cache::{
    config::Config,
    database::Database,
    ingestor::{worker, RefreshService, SchedulerService},
    services::{GuideCache, GuideService},
    sources::XtreamClient,
    web::WebServer,
};

#[derive(Parser)]
#[command(name = "guide-cache")]
#[command(version)]
#[command(about = "TV guide synchronization and caching service for Xtream-compatible IPTV sources")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one isolated refresh command read from stdin, then exit.
    /// Spawned by the scheduler; not meant for interactive use.
    Worker,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let is_worker = matches!(cli.command, Some(Commands::Worker));

    // The worker's stdout carries protocol messages; its logs go to stderr
    let log_filter = format!("guide_cache={}", cli.log_level);
    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| log_filter.into()),
    );
    if is_worker {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let mut config = Config::load_from_file(&cli.config)?;
    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }

    if is_worker {
        return worker::run_worker(config).await;
    }

    info!("Starting guide-cache v{}", env!("CARGO_PKG_VERSION"));
    info!("Using database: {}", config.database.url);

    let database = Database::new(&config.database).await?;
    database.migrate().await?;
    info!("Database connection established and migrations applied");

    let cache = GuideCache::new(config.cache.ttl_secs);
    let client = XtreamClient::new(&config.ingestion);
    let guide_service = GuideService::new(
        database.clone(),
        cache.clone(),
        client,
        config.guide.clone(),
    );
    let refresh_service = RefreshService::new(database.clone(), &config);

    let scheduler = SchedulerService::new(
        database.clone(),
        config.clone(),
        cli.config.clone(),
        cache.clone(),
    );
    let scheduler_tx = scheduler.event_sender();
    info!("Scheduler service initialized");

    let web_server = WebServer::new(
        config,
        database,
        cache,
        guide_service,
        refresh_service,
        scheduler_tx,
    )?;

    info!(
        "Starting web server on {}:{}",
        web_server.host(),
        web_server.port()
    );

    tokio::spawn(async move {
        if let Err(e) = scheduler.start().await {
            tracing::error!("Scheduler service failed: {e}");
        }
    });

    web_server.serve().await
}
