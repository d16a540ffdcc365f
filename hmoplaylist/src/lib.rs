//! # hmoplaylist - scheduled playlists for home output devices
//!
//! This crate owns named playlists and plays them on the device bound to
//! each of them:
//! - a cyclic main list, preceded on each weekday by that day's pre-roll
//! - automatic advance near the end of every file
//! - cron activation, button triggers and session time limits
//! - background probing of missing durations with a failure blacklist
//! - persistence of the whole document in a key-value store (SQLite)
//!
//! # Architecture
//!
//! - **PlaylistEngine**: state machine, timers and cron wiring
//! - **PlaylistRepository**: load, migration and save of the document
//! - **KeyValueStore**: `SqliteStore` or `MemoryStore`
//! - **DurationProber**: `ffprobe` by default
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hmodevice::DefaultAdapterFactory;
//! use hmoplaylist::{EngineOptions, FfprobeProber, PlaylistEngine, PlaylistRepository, SqliteStore};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let store = SqliteStore::open("playlists.db".as_ref())?;
//! let repository = PlaylistRepository::new(Arc::new(store), "playlists");
//! let engine = PlaylistEngine::new(
//!     repository,
//!     Arc::new(DefaultAdapterFactory::default()),
//!     Arc::new(FfprobeProber::default()),
//!     EngineOptions::default(),
//! );
//! engine.start().await?;
//!
//! let outcome = engine.play("morning", false).await?;
//! println!("Playing {}", outcome.uri);
//! # Ok(())
//! # }
//! ```

mod blacklist;
mod engine;
mod error;
mod model;
mod prober;
mod repository;
mod state;
mod store;

#[cfg(feature = "hmoconfig")]
mod config_ext;

pub use blacklist::{DurationBlacklist, MAX_PROBE_FAILURES};
pub use engine::{
    ButtonAction, ButtonOutcome, EngineOptions, PlayOutcome, PlaylistEngine, PlaylistView,
    cron_job_id, next_job_id, playlist_of_job, session_job_id, stop_verify_job_id,
};
pub use error::{ERROR_CODE, EngineError, Reply, Result};
pub use model::{FileEntry, Playlist, Playlists, Schedule, WEEK_DAYS, today_index, weekday_index};
pub use prober::{DurationProber, FfprobeProber, ProbeError};
pub use repository::PlaylistRepository;
pub use state::{CursorError, PlayState};
pub use store::{KeyValueStore, MemoryStore, SqliteStore, StoreError};

#[cfg(feature = "hmoconfig")]
pub use config_ext::PlaylistConfigExt;
