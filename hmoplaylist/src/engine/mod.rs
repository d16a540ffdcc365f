//! The playlist engine.
//!
//! One [`PlaylistEngine`] owns the playlist document (through its
//! [`PlaylistRepository`]), the device adapters, the per-playlist play
//! state and every timer. All mutations go through a single async lock,
//! so play, stop, timer and cron callbacks for a playlist are applied one
//! at a time.
//!
//! Slow work that is not needed to start playback (batch duration probing)
//! runs on a worker thread. Its results come back through a bounded
//! channel drained by the persistence task, the only code besides the
//! engine methods that writes to the repository.

mod durations;
mod playback;
mod timers;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError};

use chrono::{DateTime, Local};
use hmodevice::{AdapterFactory, DeviceAdapter};
use hmoschedule::Scheduler;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::blacklist::DurationBlacklist;
use crate::error::{EngineError, Result};
use crate::model::{Playlist, Playlists};
use crate::prober::DurationProber;
use crate::repository::PlaylistRepository;
use crate::state::PlayState;

pub use playback::{ButtonAction, ButtonOutcome, PlayOutcome};
pub use timers::{
    cron_job_id, next_job_id, playlist_of_job, session_job_id, stop_verify_job_id,
};

use durations::DurationBatch;

#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// Capacity of the persistence hand-off channel.
    pub persist_queue: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self { persist_queue: 16 }
    }
}

/// A playlist together with its live playback status.
#[derive(Clone, Debug, Serialize)]
pub struct PlaylistView {
    pub playlist: Playlist,
    pub is_playing: bool,
    pub in_pre_files: bool,
    pub pre_index: Option<usize>,
    pub session_started_at: Option<DateTime<Local>>,
}

enum PersistRequest {
    Save,
    Durations(DurationBatch),
}

#[derive(Clone, Copy, Debug)]
struct PlaySent {
    seq: u64,
    at: Instant,
}

struct EngineState {
    repository: PlaylistRepository,
    adapters: HashMap<String, Arc<dyn DeviceAdapter>>,
    play_states: HashMap<String, PlayState>,
    session_started: HashMap<String, DateTime<Local>>,
    last_play: HashMap<String, PlaySent>,
    blacklist: DurationBlacklist,
    cron_jobs: HashSet<String>,
    play_seq: u64,
}

impl EngineState {
    fn is_active(&self, id: &str) -> bool {
        self.repository.get(id).is_some_and(|p| p.is_playing)
    }

    fn note_play_sent(&mut self, id: &str) -> u64 {
        self.play_seq += 1;
        self.last_play.insert(
            id.to_string(),
            PlaySent {
                seq: self.play_seq,
                at: Instant::now(),
            },
        );
        self.play_seq
    }

    fn view(&self, id: &str) -> Option<PlaylistView> {
        let playlist = self.repository.get(id)?;
        let cursor = self.play_states.get(id);
        Some(PlaylistView {
            playlist: playlist.clone(),
            is_playing: playlist.is_playing,
            in_pre_files: cursor.is_some_and(|c| c.in_pre_files),
            pre_index: cursor.filter(|c| c.in_pre_files).map(|c| c.pre_index),
            session_started_at: self.session_started.get(id).copied(),
        })
    }
}

struct EngineInner {
    state: Mutex<EngineState>,
    scheduler: Scheduler,
    factory: Arc<dyn AdapterFactory>,
    prober: Arc<dyn DurationProber>,
    resolving: Arc<std::sync::Mutex<bool>>,
    persist_tx: mpsc::Sender<PersistRequest>,
    persist_rx: std::sync::Mutex<Option<mpsc::Receiver<PersistRequest>>>,
}

/// Shared handle on the engine. Clones drive the same engine.
#[derive(Clone)]
pub struct PlaylistEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for PlaylistEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaylistEngine")
            .field("scheduler", &self.inner.scheduler)
            .finish()
    }
}

impl PlaylistEngine {
    pub fn new(
        repository: PlaylistRepository,
        factory: Arc<dyn AdapterFactory>,
        prober: Arc<dyn DurationProber>,
        options: EngineOptions,
    ) -> Self {
        let (persist_tx, persist_rx) = mpsc::channel(options.persist_queue.max(1));

        Self {
            inner: Arc::new(EngineInner {
                state: Mutex::new(EngineState {
                    repository,
                    adapters: HashMap::new(),
                    play_states: HashMap::new(),
                    session_started: HashMap::new(),
                    last_play: HashMap::new(),
                    blacklist: DurationBlacklist::default(),
                    cron_jobs: HashSet::new(),
                    play_seq: 0,
                }),
                scheduler: Scheduler::new(),
                factory,
                prober,
                resolving: Arc::new(std::sync::Mutex::new(false)),
                persist_tx,
                persist_rx: std::sync::Mutex::new(Some(persist_rx)),
            }),
        }
    }

    /// Loads the playlists, builds adapters and cron jobs and starts the
    /// persistence task. Must run inside a tokio runtime; later calls are
    /// no-ops.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let mut slot = self
            .inner
            .persist_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            debug!("Playlist engine already started");
            return Ok(());
        }

        state.repository.load()?;
        self.rebuild_all(&mut state);
        self.cleanup_orphans(&mut state);

        if let Some(receiver) = slot.take() {
            tokio::spawn(durations::persistence_consumer(
                Arc::downgrade(&self.inner),
                receiver,
            ));
        }

        info!(
            playlists = state.repository.playlists().len(),
            devices = state.adapters.len(),
            cron_jobs = state.cron_jobs.len(),
            "Playlist engine started"
        );
        Ok(())
    }

    /// Cancels every timer and cron job.
    pub fn shutdown(&self) {
        self.inner.scheduler.shutdown();
        info!("Playlist engine stopped");
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// One playlist, or all of them when `id` is `None`. Also starts a
    /// background pass resolving missing durations.
    pub async fn get(&self, id: Option<&str>) -> Result<Vec<PlaylistView>> {
        let state = self.inner.state.lock().await;
        let views = match id {
            Some(id) => vec![
                state
                    .view(id)
                    .ok_or_else(|| EngineError::NotFound(id.to_string()))?,
            ],
            None => state
                .repository
                .playlists()
                .keys()
                .filter_map(|id| state.view(id))
                .collect(),
        };
        self.scan_durations(&state);
        Ok(views)
    }

    /// Replaces the whole document. Adapters and cron jobs are rebuilt;
    /// playlists that disappear are stopped and forgotten.
    pub async fn replace_all(&self, playlists: Playlists) -> Result<usize> {
        let mut incoming = Playlists::new();
        for (key, mut playlist) in playlists {
            if key.trim().is_empty() {
                return Err(EngineError::InvalidPlaylist("empty playlist id".to_string()));
            }
            playlist.id = key.clone();
            validate_playlist(&playlist)?;
            playlist.migrate();
            incoming.insert(key, playlist);
        }

        let mut state = self.inner.state.lock().await;
        let gone: Vec<String> = state
            .repository
            .playlists()
            .keys()
            .filter(|id| !incoming.contains_key(*id))
            .cloned()
            .collect();
        for id in &gone {
            self.forget(&mut state, id);
        }
        for (id, playlist) in incoming.iter_mut() {
            playlist.is_playing = state.is_active(id);
        }

        let count = incoming.len();
        if let Err(e) = state.repository.save_all(incoming) {
            warn!(error = %e, "Playlists replaced in memory but not persisted");
        }
        self.rebuild_all(&mut state);
        self.cleanup_orphans(&mut state);

        info!(playlists = count, removed = gone.len(), "Playlists replaced");
        Ok(count)
    }

    /// Inserts or updates one playlist.
    pub async fn upsert(&self, mut playlist: Playlist) -> Result<()> {
        if playlist.id.trim().is_empty() {
            return Err(EngineError::InvalidPlaylist("empty playlist id".to_string()));
        }
        validate_playlist(&playlist)?;
        playlist.migrate();

        let mut state = self.inner.state.lock().await;
        let previous_device = state.repository.get(&playlist.id).map(|p| p.device.clone());
        playlist.is_playing = state.is_active(&playlist.id);

        if let Err(e) = state.repository.save_single(playlist.clone()) {
            warn!(playlist_id = %playlist.id, error = %e, "Playlist updated in memory but not persisted");
        }
        if previous_device.as_ref() != Some(&playlist.device) {
            self.rebuild_adapter(&mut state, &playlist);
        }
        self.refresh_cron(&mut state, &playlist);

        debug!(playlist_id = %playlist.id, "Playlist updated");
        Ok(())
    }

    /// Stops tracking a playlist and drops it from the document.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if !state.repository.contains(id) {
            return Err(EngineError::NotFound(id.to_string()));
        }

        self.forget(&mut state, id);
        if let Err(e) = state.repository.remove(id) {
            warn!(playlist_id = %id, error = %e, "Playlist removed in memory but not persisted");
        }
        self.cleanup_orphans(&mut state);

        info!(playlist_id = %id, "Playlist removed");
        Ok(())
    }

    /// Stores the playlist volume and pushes it to its device.
    pub async fn set_volume(&self, id: &str, volume: u32) -> Result<()> {
        let level = u8::try_from(volume)
            .ok()
            .filter(|v| *v <= 100)
            .ok_or(EngineError::InvalidVolume(volume))?;

        let mut state = self.inner.state.lock().await;
        let playlist = state
            .repository
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        playlist.device_volume = Some(level);
        self.request_save();

        if let Some(adapter) = state.adapters.get(id) {
            adapter
                .set_volume(level)
                .map_err(|e| EngineError::device(id, e))?;
        }
        Ok(())
    }

    /// Whether a batch duration resolution is running.
    pub fn durations_in_flight(&self) -> bool {
        *self
            .inner
            .resolving
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Consecutive probe failures recorded for `uri`.
    pub async fn probe_failures(&self, uri: &str) -> u32 {
        self.inner.state.lock().await.blacklist.failures(uri)
    }

    /// Asks the persistence task to write the document. Requests made
    /// while one is already queued are merged into it.
    fn request_save(&self) {
        if let Err(e) = self.inner.persist_tx.try_send(PersistRequest::Save) {
            match e {
                mpsc::error::TrySendError::Full(_) => debug!("Persistence queue full, save already pending"),
                mpsc::error::TrySendError::Closed(_) => warn!("Persistence task gone, save dropped"),
            }
        }
    }

    fn rebuild_adapter(&self, state: &mut EngineState, playlist: &Playlist) {
        state.adapters.remove(&playlist.id);
        if playlist.device.is_unbound() {
            return;
        }
        match self.inner.factory.build(&playlist.device) {
            Ok(adapter) => {
                debug!(
                    playlist_id = %playlist.id,
                    device_type = %playlist.device.kind,
                    device = %playlist.device.name,
                    "Device adapter ready"
                );
                state.adapters.insert(playlist.id.clone(), adapter);
            }
            Err(e) => warn!(
                playlist_id = %playlist.id,
                device_type = %playlist.device.kind,
                error = %e,
                "Cannot build device adapter"
            ),
        }
    }

    fn rebuild_all(&self, state: &mut EngineState) {
        let playlists: Vec<Playlist> = state.repository.playlists().values().cloned().collect();

        state.adapters.clear();
        for playlist in &playlists {
            self.rebuild_adapter(state, playlist);
        }

        for id in state.cron_jobs.drain() {
            self.inner.scheduler.remove_job(&cron_job_id(&id));
        }
        for playlist in &playlists {
            self.refresh_cron(state, playlist);
        }
    }

    /// Drops everything the engine tracks for `id`, stopping its device
    /// when it was playing.
    fn forget(&self, state: &mut EngineState, id: &str) {
        self.cancel_playback_timers(id);
        self.inner.scheduler.remove_job(&stop_verify_job_id(id));
        if state.cron_jobs.remove(id) {
            self.inner.scheduler.remove_job(&cron_job_id(id));
        }

        let was_playing = state.is_active(id);
        state.play_states.remove(id);
        state.session_started.remove(id);
        state.last_play.remove(id);

        if let Some(adapter) = state.adapters.remove(id) {
            if was_playing {
                if let Err(e) = adapter.stop() {
                    warn!(playlist_id = %id, error = %e, "Failed to stop device of dropped playlist");
                }
            }
        }
    }

    /// Removes jobs and per-playlist entries whose playlist no longer
    /// exists.
    fn cleanup_orphans(&self, state: &mut EngineState) {
        for job in self.inner.scheduler.get_all_jobs() {
            if let Some(playlist_id) = playlist_of_job(&job.id) {
                if !state.repository.contains(playlist_id) {
                    debug!(job_id = %job.id, "Removing orphan job");
                    self.inner.scheduler.remove_job(&job.id);
                }
            }
        }

        let repository = &state.repository;
        state.play_states.retain(|id, _| repository.contains(id));
        state.session_started.retain(|id, _| repository.contains(id));
        state.last_play.retain(|id, _| repository.contains(id));
        state.adapters.retain(|id, _| repository.contains(id));
        state.cron_jobs.retain(|id| repository.contains(id));
    }
}

fn validate_playlist(playlist: &Playlist) -> Result<()> {
    if let Some(volume) = playlist.device_volume {
        if volume > 100 {
            return Err(EngineError::InvalidVolume(u32::from(volume)));
        }
    }
    Ok(())
}
