//! hmoconfig extension for the playlist engine

use std::path::PathBuf;
use std::time::Duration;

use hmodevice::DeviceSettings;

use crate::engine::EngineOptions;
use crate::prober::FfprobeProber;

/// Extension trait for hmoconfig::Config
pub trait PlaylistConfigExt {
    /// Path of the playlist database, creating its directory if needed.
    fn playlist_db_path(&self) -> anyhow::Result<PathBuf>;

    fn engine_options(&self) -> EngineOptions;

    fn device_settings(&self) -> DeviceSettings;

    fn duration_prober(&self) -> FfprobeProber;
}

impl PlaylistConfigExt for hmoconfig::Config {
    fn playlist_db_path(&self) -> anyhow::Result<PathBuf> {
        let playlists_dir = self.get_managed_dir(&["playlists", "directory"], "playlists")?;
        Ok(PathBuf::from(playlists_dir).join("playlists.db"))
    }

    fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            persist_queue: self.get_persist_queue_capacity(),
        }
    }

    fn device_settings(&self) -> DeviceSettings {
        DeviceSettings {
            http_timeout: Duration::from_secs(self.get_device_http_timeout_secs() as u64),
            bluetooth_agent_url: self.get_bluetooth_agent_url(),
        }
    }

    fn duration_prober(&self) -> FfprobeProber {
        FfprobeProber::new(&self.get_ffprobe_path())
    }
}
