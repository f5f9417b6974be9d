//! declarant-ai - batch tariff classification service
//!
//! Accepts spreadsheets of goods, classifies each row against the tariff
//! nomenclature with bounded concurrency, and keeps every batch for review
//! and export. HTTP REST + SSE on port 5730 by default.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use declarant_common::config::{load_toml_config, RootFolderInitializer, RootFolderResolver};
use declarant_common::events::EventBus;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use declarant_ai::services::OpenAiClassifier;
use declarant_ai::AppState;

/// Command-line arguments for declarant-ai
#[derive(Parser, Debug)]
#[command(name = "declarant-ai")]
#[command(about = "Batch tariff classification service")]
#[command(version)]
struct Args {
    /// Root folder holding the database
    #[arg(short, long, env = "DECLARANT_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, env = "DECLARANT_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides TOML)
    #[arg(short, long, env = "DECLARANT_PORT")]
    port: Option<u16>,

    /// Bind address (overrides TOML)
    #[arg(long, env = "DECLARANT_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml_config = load_toml_config(args.config.as_deref());

    // RUST_LOG wins over the TOML level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("declarant_ai={0},declarant_common={0},tower_http=info", toml_config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting declarant-ai (tariff classification) service");
    info!(
        "Version: {} (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let resolver = RootFolderResolver::new(args.root_folder.as_deref(), toml_config.root_folder.as_deref());
    let initializer = RootFolderInitializer::new(resolver.resolve());
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = declarant_ai::db::init_database_pool(&db_path).await?;

    let stale = declarant_ai::db::sessions::cleanup_stale_sessions(&db_pool).await?;
    if stale > 0 {
        warn!("Marked {} interrupted batch session(s) as cancelled", stale);
    }

    let api_key = declarant_ai::config::resolve_openai_api_key(&db_pool, &toml_config).await?;
    let classifier_config = declarant_ai::config::resolve_classifier_config(&db_pool, &toml_config).await?;
    info!(
        agent_type = classifier_config.agent_type.as_str(),
        model = %classifier_config.model,
        concurrency_limit = classifier_config.concurrency_limit,
        max_batch_size = classifier_config.max_batch_size,
        "Classifier configured"
    );

    let classifier = OpenAiClassifier::new(classifier_config.clone(), api_key.clone())
        .context("Failed to build classification client")?;

    let event_bus = EventBus::new(100);
    let state = AppState::new(db_pool, event_bus, classifier_config, Arc::new(classifier)).with_api_key(api_key);
    let app = declarant_ai::build_router(state);

    let bind = args.bind.unwrap_or(toml_config.bind);
    let port = args.port.unwrap_or(toml_config.port);
    let addr: SocketAddr = format!("{}:{}", bind, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", bind, port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
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
            Ok(mut sig) => {
                sig.recv().await;
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
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
