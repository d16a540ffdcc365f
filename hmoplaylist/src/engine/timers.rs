//! Cron wiring and per-playlist timers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use hmoschedule::{JobCallback, job_fn};
use tracing::{debug, info, warn};

use super::{EngineState, PlaylistEngine};
use crate::model::Playlist;

const CRON_PREFIX: &str = "playlist_cron_";
const NEXT_PREFIX: &str = "playlist_next_";
const SESSION_PREFIX: &str = "playlist_duration_";
const STOP_VERIFY_PREFIX: &str = "playlist_stop_verify_";

/// Delay before a stop is re-issued, and the window after a play in which
/// a stop gets verified.
pub(super) const STOP_VERIFY_DELAY: Duration = Duration::from_secs(3);

/// Shortest file-advance delay, in seconds.
const MIN_ADVANCE_SECS: u64 = 3;

/// Longest wait for a device to finish the current file before advancing.
const MAX_FINISH_WAIT_SECS: u64 = 5;

pub fn cron_job_id(id: &str) -> String {
    format!("{CRON_PREFIX}{id}")
}

pub fn next_job_id(id: &str) -> String {
    format!("{NEXT_PREFIX}{id}")
}

pub fn session_job_id(id: &str) -> String {
    format!("{SESSION_PREFIX}{id}")
}

pub fn stop_verify_job_id(id: &str) -> String {
    format!("{STOP_VERIFY_PREFIX}{id}")
}

/// Playlist id embedded in an engine job id.
pub fn playlist_of_job(job_id: &str) -> Option<&str> {
    [STOP_VERIFY_PREFIX, NEXT_PREFIX, SESSION_PREFIX, CRON_PREFIX]
        .iter()
        .find_map(|prefix| job_id.strip_prefix(prefix))
        .filter(|id| !id.is_empty())
}

/// Delay of the file-advance timer for a file of `duration` seconds.
pub(super) fn advance_delay(duration: u64) -> Duration {
    Duration::from_secs(duration.saturating_sub(1).max(MIN_ADVANCE_SECS))
}

impl PlaylistEngine {
    /// Job callback running `task` on this engine, if it is still alive.
    fn engine_job<F, Fut>(&self, playlist_id: &str, task: F) -> JobCallback
    where
        F: Fn(PlaylistEngine, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let engine = Arc::downgrade(&self.inner);
        let playlist_id = playlist_id.to_string();
        job_fn(move || {
            let run = engine
                .upgrade()
                .map(|inner| task(PlaylistEngine { inner }, playlist_id.clone()));
            async move {
                if let Some(run) = run {
                    run.await;
                }
            }
        })
    }

    pub(super) fn refresh_cron(&self, state: &mut EngineState, playlist: &Playlist) {
        let job_id = cron_job_id(&playlist.id);
        self.inner.scheduler.remove_job(&job_id);
        state.cron_jobs.remove(&playlist.id);

        if !playlist.schedule.is_armed() {
            return;
        }

        let callback = self.engine_job(&playlist.id, |engine, id| async move {
            engine.cron_fired(&id).await;
        });
        if self
            .inner
            .scheduler
            .add_cron_job(&job_id, &playlist.schedule.cron, callback)
        {
            info!(playlist_id = %playlist.id, cron = %playlist.schedule.cron, "Cron job registered");
            state.cron_jobs.insert(playlist.id.clone());
        } else {
            warn!(
                playlist_id = %playlist.id,
                cron = %playlist.schedule.cron,
                "Cron job not registered, playlist stays available for manual play"
            );
        }
    }

    pub(super) fn arm_file_timer(&self, id: &str, duration: u64) {
        let delay = advance_delay(duration);
        let callback = self.engine_job(id, |engine, id| async move {
            engine.file_timer_fired(&id).await;
        });
        if self.inner.scheduler.add_job_in(&next_job_id(id), delay, callback) {
            debug!(playlist_id = %id, delay_secs = delay.as_secs(), "File timer armed");
        }
    }

    /// Arms the session limit unless one is already running.
    pub(super) fn arm_session_timer(&self, state: &mut EngineState, id: &str, minutes: u64) {
        let job_id = session_job_id(id);
        if self.inner.scheduler.has_job(&job_id) {
            return;
        }
        let callback = self.engine_job(id, |engine, id| async move {
            engine.session_timer_fired(&id).await;
        });
        if self
            .inner
            .scheduler
            .add_job_in(&job_id, Duration::from_secs(minutes * 60), callback)
        {
            state.session_started.insert(id.to_string(), Local::now());
            info!(playlist_id = %id, minutes, "Session limit armed");
        }
    }

    pub(super) fn arm_stop_verify(&self, id: &str) {
        let callback = self.engine_job(id, |engine, id| async move {
            engine.stop_verify_fired(&id).await;
        });
        self.inner
            .scheduler
            .add_job_in(&stop_verify_job_id(id), STOP_VERIFY_DELAY, callback);
    }

    pub(super) fn cancel_file_timer(&self, id: &str) {
        self.inner.scheduler.remove_job(&next_job_id(id));
    }

    pub(super) fn cancel_playback_timers(&self, id: &str) {
        self.cancel_file_timer(id);
        self.inner.scheduler.remove_job(&session_job_id(id));
    }

    /// Cron entry point. Never stacks a play on an active playlist.
    pub async fn cron_fired(&self, id: &str) {
        let mut state = self.inner.state.lock().await;
        if !state.repository.contains(id) {
            debug!(playlist_id = %id, "Cron fired for unknown playlist");
            return;
        }
        if state.is_active(id) {
            info!(playlist_id = %id, "Cron trigger skipped, playlist already playing");
            return;
        }

        match self.play_locked(&mut state, id, false) {
            Ok(outcome) => {
                state.session_started.insert(id.to_string(), Local::now());
                info!(playlist_id = %id, uri = %outcome.uri, "Cron started playlist");
            }
            Err(e) => warn!(playlist_id = %id, error = %e, "Cron failed to start playlist"),
        }
    }

    /// Near the end of a file: let the device finish, stop it so it does
    /// not repeat, then move on.
    async fn file_timer_fired(&self, id: &str) {
        let (adapter, token) = {
            let state = self.inner.state.lock().await;
            match (state.is_active(id), state.adapters.get(id), state.last_play.get(id)) {
                (true, Some(adapter), Some(sent)) => (adapter.clone(), sent.seq),
                _ => {
                    debug!(playlist_id = %id, "File timer fired for inactive playlist");
                    return;
                }
            }
        };

        let status = match adapter.get_status() {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(playlist_id = %id, error = %e, "Cannot read device status, advancing");
                None
            }
        };
        let still_playing = status.as_ref().is_some_and(|s| !s.state.is_stopped());
        if still_playing {
            let wait = status
                .and_then(|s| s.remaining())
                .unwrap_or(0)
                .min(MAX_FINISH_WAIT_SECS);
            if wait > 0 {
                tokio::time::sleep(Duration::from_secs(wait)).await;
            }
        }

        let mut state = self.inner.state.lock().await;
        if !state.is_active(id) || state.last_play.get(id).map(|s| s.seq) != Some(token) {
            debug!(playlist_id = %id, "Playback changed while waiting, not advancing");
            return;
        }
        if still_playing {
            if let Err(e) = adapter.stop() {
                warn!(playlist_id = %id, error = %e, "Stop before advance failed");
            }
        }
        if let Err(e) = self.play_next_locked(&mut state, id) {
            warn!(playlist_id = %id, error = %e, "Automatic advance failed");
        }
    }

    async fn session_timer_fired(&self, id: &str) {
        let mut state = self.inner.state.lock().await;
        state.session_started.remove(id);
        if !state.is_active(id) {
            return;
        }
        info!(playlist_id = %id, "Session limit reached, stopping");
        if let Err(e) = self.stop_locked(&mut state, id) {
            warn!(playlist_id = %id, error = %e, "Stop at session limit failed");
        }
    }

    async fn stop_verify_fired(&self, id: &str) {
        let state = self.inner.state.lock().await;
        if state.is_active(id) {
            debug!(playlist_id = %id, "Playlist restarted, stop not re-issued");
            return;
        }
        if let Some(adapter) = state.adapters.get(id) {
            match adapter.stop() {
                Ok(()) => debug!(playlist_id = %id, "Stop re-issued"),
                Err(e) => warn!(playlist_id = %id, error = %e, "Re-issued stop failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_round_trip_to_playlist() {
        for id in [cron_job_id("p1"), next_job_id("p1"), session_job_id("p1"), stop_verify_job_id("p1")] {
            assert_eq!(playlist_of_job(&id), Some("p1"));
        }
        assert_eq!(playlist_of_job("backup_nightly"), None);
        assert_eq!(playlist_of_job("playlist_next_"), None);
    }

    #[test]
    fn advance_fires_a_second_early_but_not_too_soon() {
        assert_eq!(advance_delay(180), Duration::from_secs(179));
        assert_eq!(advance_delay(4), Duration::from_secs(3));
        assert_eq!(advance_delay(0), Duration::from_secs(3));
    }
}
