use std::sync::Arc;

use clap::Parser;
use focus_core::{
    config::{parse_listen, Args},
    server::{router, AppState},
    stats::now_ms,
    store::{KvStore, SqliteStore},
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "focus_core=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    if let Some(parent) = args.db.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let store: Arc<dyn KvStore> = Arc::new(SqliteStore::open(&args.db)?);
    let state = AppState::new(store, args.engine_config(), now_ms());
    state.engine().initialize(now_ms()).await?;

    let app = router(state);

    let addr = parse_listen(&args.listen)?;
    info!("Core listening on http://{addr}");
    info!("DB: {}", args.db.display());
    info!("Calendar offset: {} min", args.engine_config().tz_offset.whole_minutes());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}
