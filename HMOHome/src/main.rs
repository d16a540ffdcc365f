mod logs;

use std::sync::Arc;

use anyhow::Context;
use hmoconfig::get_config;
use hmodevice::DefaultAdapterFactory;
use hmoplaylist::{PlaylistConfigExt, PlaylistEngine, PlaylistRepository, SqliteStore};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logs::init_logging();
    let config = get_config();
    info!(config_dir = %config.dir(), "HMOHome starting");

    let db_path = config
        .playlist_db_path()
        .context("Cannot prepare the playlists directory")?;
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("Cannot open playlist store {}", db_path.display()))?;
    let repository = PlaylistRepository::new(Arc::new(store), &config.get_playlist_store_key());

    let engine = PlaylistEngine::new(
        repository,
        Arc::new(DefaultAdapterFactory::new(config.device_settings())),
        Arc::new(config.duration_prober()),
        config.engine_options(),
    );
    engine.start().await.context("Cannot start the playlist engine")?;

    let playlists = engine.get(None).await?;
    info!(playlists = playlists.len(), "Playlist engine ready");
    for view in &playlists {
        info!(
            "  - {} ({}) on {} [{}]",
            view.playlist.name,
            view.playlist.id,
            view.playlist.device.name,
            if view.playlist.schedule.is_armed() { view.playlist.schedule.cron.as_str() } else { "manual" }
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("Cannot listen for Ctrl-C")?;
    info!("Shutting down");
    engine.shutdown();
    Ok(())
}
