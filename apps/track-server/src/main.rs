//! Track Server
//! Runs tracking jobs for uploaded videos and serves their progress and results

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use track_server::{router, AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("track_server=info,jobs=info")),
        )
        .init();

    info!("Starting track server...");

    let config = ServerConfig::from_env();
    std::fs::create_dir_all(&config.upload_dir)
        .with_context(|| format!("create upload dir {}", config.upload_dir.display()))?;
    let tracker = config.tracker()?;
    info!(
        upload_dir = %config.upload_dir.display(),
        tracker = %config.tracker_command,
        "configuration loaded"
    );

    let app = router(AppState::new(tracker, config.upload_dir.clone()));

    let listener = tokio::net::TcpListener::bind(&config.addr)
        .await
        .with_context(|| format!("bind {}", config.addr))?;
    info!("Track server listening on http://{}", config.addr);
    info!("API endpoints:");
    info!("  POST /track                 - Start a tracking job");
    info!("  GET  /track/:id/progress    - Job progress");
    info!("  GET  /track/:id/result      - Annotation table");
    info!("  GET  /video/:video_id       - Uploaded video");
    info!("  GET  /health                - Health check");

    axum::serve(listener, app).await?;

    Ok(())
}
