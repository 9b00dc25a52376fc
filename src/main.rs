use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use roombook::api::{self, AppState};
use roombook::auth::Directory;
use roombook::backend::LocalBackend;
use roombook::config::{Config, Seed};
use roombook::engine::Engine;
use roombook::reaper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    roombook::observability::init(config.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let engine = Arc::new(Engine::new(config.wal_path())?);
    let directory = Arc::new(Directory::new());
    if let Some(path) = &config.seed {
        Seed::load(path)?.apply(&engine, &directory).await?;
    }

    let completer_engine = engine.clone();
    let every = config.completer_interval;
    tokio::spawn(async move {
        reaper::run_completer(completer_engine, every).await;
    });
    let compactor_engine = engine.clone();
    let threshold = config.compact_threshold;
    tokio::spawn(async move {
        reaper::run_compactor(compactor_engine, threshold).await;
    });

    let sweeper_directory = directory.clone();
    tokio::spawn(async move {
        reaper::run_token_sweeper(sweeper_directory, every).await;
    });

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("roombook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  seed: {}", config.seed.as_ref().map_or("none".to_string(), |p| p.display().to_string()));
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight requests
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
        info!("shutdown signal received, draining requests");
    };

    let state = AppState::new(Arc::new(LocalBackend::new(engine, directory)));
    api::serve(listener, state, shutdown).await?;

    info!("roombook stopped");
    Ok(())
}
