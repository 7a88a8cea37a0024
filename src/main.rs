use std::net::SocketAddr;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use chirp::config::{Cli, Config};
use chirp::media::{self, MediaDelegate};
use chirp::state::AppState;
use chirp::{db, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    // Ensure media directories exist
    std::fs::create_dir_all(config.media_temp_dir())?;
    std::fs::create_dir_all(config.media_local_dir())?;

    // Initialize database
    let pool = db::create_pool(&config.db_path())?;
    db::run_migrations(&pool)?;

    let orphans = media::orphaned(&*pool.get()?)?;
    if !orphans.is_empty() {
        tracing::warn!(
            count = orphans.len(),
            "Orphaned media awaiting reconciliation (see the orphaned_media table)"
        );
    }

    let store = media::build_store(&config)?;
    tracing::info!("Media backend: {:?}", config.media.backend);

    let state = AppState {
        media: MediaDelegate::new(store, config.media.folder.clone(), pool.clone()),
        db: pool,
        config: config.clone(),
    };

    let app = routes::app(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
