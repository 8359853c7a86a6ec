//! treed-sa (Scan Analytics) - HTTP service entry point
//!
//! Records visitor QR scans and serves completion analytics to museum
//! administrators.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use treed_common::api::load_admin_secret;
use treed_common::config::{resolve_root_folder, RootFolder, ServiceConfig};
use treed_common::db::init_database;
use treed_common::time::SystemClock;
use treed_common::Catalog;
use treed_sa::evaluator::CompletionThreshold;
use treed_sa::store::SqliteScanStore;
use treed_sa::{build_router, cors_layer, AppState, ScanAnalytics};

/// Command-line arguments for treed-sa
#[derive(Parser, Debug)]
#[command(name = "treed-sa")]
#[command(about = "Scan Analytics service for Tree-D audio guides")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "TREED_PORT")]
    port: Option<u16>,

    /// Root folder holding the database and config file
    #[arg(short, long, env = "TREED_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Config file (default: <root folder>/treed.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Catalog file (overrides the config file; default: built-in catalog)
    #[arg(long, env = "TREED_CATALOG")]
    catalog: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let root = RootFolder::new(resolve_root_folder(args.root_folder.as_deref()));
    let config_path = args.config.clone().unwrap_or_else(|| root.config_path());
    let file_config = ServiceConfig::read(&config_path)
        .with_context(|| format!("Failed to read config {}", config_path.display()))?;
    let config_found = file_config.is_some();
    let config = file_config.unwrap_or_default();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Log build identification immediately after tracing init
    info!(
        "Starting Tree-D Scan Analytics (treed-sa) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    if config_found {
        info!("Loaded config from {}", config_path.display());
    } else {
        warn!(
            "Config file {} not found, using defaults",
            config_path.display()
        );
    }

    root.ensure_exists()
        .with_context(|| format!("Failed to create root folder {}", root.path().display()))?;
    let db_path = root.database_path();
    info!("Database path: {}", db_path.display());
    let pool = init_database(&db_path)
        .await
        .context("Failed to initialize database")?;

    let catalog = match args.catalog.as_ref().or(config.catalog_path.as_ref()) {
        Some(path) => {
            info!("Loading catalog from {}", path.display());
            Catalog::load(path).context("Failed to load catalog")?
        }
        None => {
            info!("Using built-in catalog");
            Catalog::builtin().context("Built-in catalog is invalid")?
        }
    };
    info!(
        "Catalog: {} artifacts, {} languages",
        catalog.artifact_count(),
        catalog.language_count()
    );
    let missing = catalog.missing_durations();
    if !missing.is_empty() {
        warn!(
            "{} artifact/language pairs have no audio duration; they will be excluded from completion rates",
            missing.len()
        );
        for pair in &missing {
            debug!("No duration for {} ({}) / {} ({})", pair.artifact, pair.slot, pair.language, pair.code);
        }
    }

    let admin_secret = match config.admin_secret {
        Some(secret) => secret,
        None => load_admin_secret(&pool)
            .await
            .context("Failed to load administrator secret")?,
    };
    if admin_secret == 0 {
        warn!("Administrator checks DISABLED (admin_secret = 0); analytics are open to anyone");
    } else {
        info!("✓ Administrator secret loaded");
    }

    let threshold = CompletionThreshold::from_fraction(config.completion_threshold)
        .context("Invalid completion threshold")?;
    info!("Completion threshold: {:.1}%", threshold.fraction() * 100.0);

    let analytics = Arc::new(ScanAnalytics::new(
        Arc::new(catalog),
        Arc::new(SqliteScanStore::new(pool)),
        Arc::new(SystemClock::new()),
        threshold,
    ));

    let state = AppState::new(analytics, admin_secret, config.auth_window());
    let app = build_router(state).layer(cors_layer(&config.allowed_origins));

    let port = args.port.unwrap_or(config.port);
    let addr: SocketAddr = format!("{}:{}", config.bind, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.bind, port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("treed-sa listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
