//! Play, next, previous, stop and button triggers.

use std::str::FromStr;
use std::sync::Arc;

use hmodevice::DeviceAdapter;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::timers::STOP_VERIFY_DELAY;
use super::{EngineState, PlaylistEngine};
use crate::error::{EngineError, Result};
use crate::model::{Playlist, today_index};
use crate::state::{CursorError, PlayState};

/// What a successful play sent to the device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlayOutcome {
    pub id: String,
    pub uri: String,
    pub duration: Option<u64>,
    pub in_pre_files: bool,
    /// Position in the pre-roll or in the main list.
    pub index: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ButtonAction {
    Play,
    Stop,
}

impl FromStr for ButtonAction {
    type Err = EngineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "play" => Ok(ButtonAction::Play),
            "stop" => Ok(ButtonAction::Stop),
            other => Err(EngineError::InvalidAction(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ButtonOutcome {
    Played(PlayOutcome),
    Stopped {
        stopped: Vec<String>,
        failures: Vec<String>,
    },
}

impl PlaylistEngine {
    /// Plays the item under the playlist cursor. An active playlist is only
    /// replayed with `force`.
    pub async fn play(&self, id: &str, force: bool) -> Result<PlayOutcome> {
        let mut state = self.inner.state.lock().await;
        self.play_locked(&mut state, id, force)
    }

    /// Moves to the next item and plays it. Without play state this starts
    /// from the beginning, pre-roll first.
    pub async fn play_next(&self, id: &str) -> Result<PlayOutcome> {
        let mut state = self.inner.state.lock().await;
        self.play_next_locked(&mut state, id)
    }

    /// Moves to the previous item and plays it.
    pub async fn play_pre(&self, id: &str) -> Result<PlayOutcome> {
        let mut state = self.inner.state.lock().await;
        let (playlist, _) = self.playable(&state, id)?;
        let today = today_index();

        let mut cursor = state
            .play_states
            .get(id)
            .cloned()
            .unwrap_or_else(|| PlayState::fresh(&playlist, today));
        cursor.normalize(&playlist, today);
        cursor
            .retreat(&playlist, today)
            .map_err(|e| EngineError::from_cursor(id, e))?;

        state.play_states.insert(id.to_string(), cursor);
        self.sync_current_index(&mut state, id);
        self.play_locked(&mut state, id, true)
    }

    pub async fn stop(&self, id: &str) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        self.stop_locked(&mut state, id)
    }

    /// `stop` stops every active playlist bound to `button`; `play` plays
    /// the first playlist bound to it.
    pub async fn trigger_button(&self, button: &str, action: &str) -> Result<ButtonOutcome> {
        let action: ButtonAction = action.parse()?;
        let mut state = self.inner.state.lock().await;

        let bound: Vec<String> = state
            .repository
            .playlists()
            .values()
            .filter(|p| p.trigger_button.as_deref() == Some(button))
            .map(|p| p.id.clone())
            .collect();
        if bound.is_empty() {
            return Err(EngineError::UnboundButton(button.to_string()));
        }

        match action {
            ButtonAction::Play => {
                let outcome = self.play_locked(&mut state, &bound[0], false)?;
                Ok(ButtonOutcome::Played(outcome))
            }
            ButtonAction::Stop => {
                let active: Vec<String> = bound.into_iter().filter(|id| state.is_active(id)).collect();
                if active.is_empty() {
                    return Err(EngineError::NothingActive(button.to_string()));
                }

                let mut stopped = Vec::new();
                let mut failures = Vec::new();
                for id in active {
                    match self.stop_locked(&mut state, &id) {
                        Ok(()) => stopped.push(id),
                        Err(e) => failures.push(format!("{id}: {e}")),
                    }
                }

                if stopped.is_empty() {
                    return Err(EngineError::StopFailures(failures));
                }
                if !failures.is_empty() {
                    warn!(button = %button, failures = ?failures, "Some playlists failed to stop");
                }
                info!(button = %button, stopped = ?stopped, "Button stopped playlists");
                Ok(ButtonOutcome::Stopped { stopped, failures })
            }
        }
    }

    /// Checks that `id` can be played or stopped at all.
    fn playable(
        &self,
        state: &EngineState,
        id: &str,
    ) -> Result<(Playlist, Arc<dyn DeviceAdapter>)> {
        let playlist = state
            .repository
            .get(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        if playlist.is_empty_on(today_index()) {
            return Err(EngineError::Empty(id.to_string()));
        }
        let adapter = state
            .adapters
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NoDevice(id.to_string()))?;
        Ok((playlist.clone(), adapter))
    }

    pub(super) fn play_locked(
        &self,
        state: &mut EngineState,
        id: &str,
        force: bool,
    ) -> Result<PlayOutcome> {
        let active = state
            .repository
            .get(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?
            .is_playing;
        if active && !force {
            return Err(EngineError::AlreadyPlaying(id.to_string()));
        }
        let (playlist, adapter) = self.playable(state, id)?;
        let today = today_index();

        let mut cursor = state
            .play_states
            .get(id)
            .cloned()
            .unwrap_or_else(|| PlayState::fresh(&playlist, today));
        cursor.normalize(&playlist, today);
        let entry = cursor
            .current(&playlist, today)
            .cloned()
            .ok_or_else(|| EngineError::Empty(id.to_string()))?;

        let duration = match entry.duration {
            Some(duration) => Some(duration),
            None => self.resolve_now(state, &entry.uri),
        };

        if let Some(volume) = playlist.device_volume {
            if let Err(e) = adapter.set_volume(volume) {
                warn!(playlist_id = %id, volume, error = %e, "Failed to set device volume");
            }
        }

        state.note_play_sent(id);
        if let Err(e) = adapter.play(&entry.uri) {
            warn!(playlist_id = %id, uri = %entry.uri, error = %e, "Device refused to play");
            self.unwind(state, id);
            return Err(EngineError::device(id, e));
        }

        let outcome = PlayOutcome {
            id: id.to_string(),
            uri: entry.uri.clone(),
            duration,
            in_pre_files: cursor.in_pre_files,
            index: if cursor.in_pre_files {
                cursor.pre_index
            } else {
                cursor.file_index
            },
        };

        state.play_states.insert(id.to_string(), cursor);
        if let Some(p) = state.repository.get_mut(id) {
            p.is_playing = true;
        }
        self.sync_current_index(state, id);
        self.request_save();

        self.cancel_file_timer(id);
        match duration {
            Some(duration) => self.arm_file_timer(id, duration),
            None => info!(playlist_id = %id, uri = %entry.uri, "Duration unknown, no automatic advance"),
        }
        if playlist.schedule.duration > 0 {
            self.arm_session_timer(state, id, playlist.schedule.duration);
        }

        info!(playlist_id = %id, uri = %outcome.uri, pre_roll = outcome.in_pre_files, "Playing");
        Ok(outcome)
    }

    pub(super) fn play_next_locked(&self, state: &mut EngineState, id: &str) -> Result<PlayOutcome> {
        let (playlist, _) = self.playable(state, id)?;
        let today = today_index();

        let step = match state.play_states.get(id).cloned() {
            None => Ok(PlayState::fresh(&playlist, today)),
            Some(mut cursor) => {
                cursor.normalize(&playlist, today);
                cursor.advance(&playlist, today).map(|()| cursor)
            }
        };

        match step {
            Ok(cursor) => {
                state.play_states.insert(id.to_string(), cursor);
            }
            Err(CursorError::Exhausted) => {
                info!(playlist_id = %id, "Pre-roll finished and no main list, stopping");
                if let Err(e) = self.stop_locked(state, id) {
                    warn!(playlist_id = %id, error = %e, "Stop after last item failed");
                }
                return Err(EngineError::Exhausted(id.to_string()));
            }
            Err(e) => return Err(EngineError::from_cursor(id, e)),
        }

        self.sync_current_index(state, id);
        self.play_locked(state, id, true)
    }

    pub(super) fn stop_locked(&self, state: &mut EngineState, id: &str) -> Result<()> {
        let (_, adapter) = self.playable(state, id)?;

        self.cancel_playback_timers(id);
        state.play_states.remove(id);
        state.session_started.remove(id);
        if let Some(p) = state.repository.get_mut(id) {
            p.is_playing = false;
        }
        self.request_save();

        let result = adapter.stop();

        let recently_played = state
            .last_play
            .get(id)
            .is_some_and(|sent| sent.at.elapsed() < STOP_VERIFY_DELAY);
        if recently_played {
            debug!(playlist_id = %id, "Stop follows a play closely, verifying later");
            self.arm_stop_verify(id);
        }

        match result {
            Ok(()) => {
                info!(playlist_id = %id, "Stopped");
                Ok(())
            }
            Err(e) => {
                warn!(playlist_id = %id, error = %e, "Device refused to stop");
                Err(EngineError::device(id, e))
            }
        }
    }

    /// Drops the playback state left by a failed play.
    fn unwind(&self, state: &mut EngineState, id: &str) {
        self.cancel_playback_timers(id);
        state.play_states.remove(id);
        state.session_started.remove(id);
        if let Some(p) = state.repository.get_mut(id) {
            p.is_playing = false;
        }
        self.request_save();
    }

    /// Persists the main list position. Pre-roll positions are never kept.
    fn sync_current_index(&self, state: &mut EngineState, id: &str) {
        let Some(index) = state
            .play_states
            .get(id)
            .filter(|c| !c.in_pre_files)
            .map(|c| c.file_index)
        else {
            return;
        };
        if let Some(p) = state.repository.get_mut(id) {
            if p.current_index != index {
                p.current_index = index;
                self.request_save();
            }
        }
    }
}
