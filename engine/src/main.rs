use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use playdeck_engine::api::{build_router, AppState};
use playdeck_engine::audio::RodioEngine;
use playdeck_engine::catalog::Catalog;
use playdeck_engine::config::Config;
use playdeck_engine::duration::{runtime_table, DurationProbe, FfprobeProbe};
use playdeck_engine::player::Player;
use playdeck_engine::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    info!(
        "music dir {}, state file {}",
        cfg.music_dir.display(),
        cfg.state_path.display()
    );
    if !cfg.music_dir.is_dir() {
        warn!("music directory {} does not exist; no playlists will be listed", cfg.music_dir.display());
    }

    let probe: Arc<dyn DurationProbe> = Arc::new(FfprobeProbe::new(cfg.ffprobe.clone()));

    // Scanning and probing every track can take a while on a large library.
    let (catalog, runtimes) = {
        let probe = Arc::clone(&probe);
        let music_dir = cfg.music_dir.clone();
        let state_path = cfg.state_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut catalog = Catalog::open(music_dir, Store::new(state_path));
            let runtimes = runtime_table(&mut catalog, probe.as_ref());
            (catalog, runtimes)
        })
        .await
        .context("runtime calculation task failed")?
    };
    info!("calculated runtimes for {} playlists", runtimes.len());

    let engine = RodioEngine::open().context("failed to open audio output")?;
    let player = Player::new(Box::new(engine), catalog, probe, runtimes);
    let app = build_router(AppState::new(player), cfg.ui_dir.as_deref());

    info!("PlayDeck engine starting on http://{}", cfg.bind);

    let listener = tokio::net::TcpListener::bind(cfg.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let term = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("cannot install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = term => {},
    }

    warn!("Shutdown signal received.");
}
