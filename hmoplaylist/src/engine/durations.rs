//! Duration resolution and the persistence task.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError, Weak};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{EngineInner, EngineState, PersistRequest, PlaylistEngine};
use crate::blacklist::MAX_PROBE_FAILURES;
use crate::model::today_index;
use crate::prober::DurationProber;

/// Results of one worker pass, applied by the persistence task.
#[derive(Debug, Default)]
pub(super) struct DurationBatch {
    resolved: Vec<(String, u64)>,
    failed: Vec<String>,
}

fn probe_all(prober: &dyn DurationProber, uris: &[String]) -> DurationBatch {
    let mut batch = DurationBatch::default();
    for uri in uris {
        match prober.probe(uri) {
            Ok(Some(duration)) => batch.resolved.push((uri.clone(), duration)),
            Ok(None) => {
                debug!(uri = %uri, "No duration found");
                batch.failed.push(uri.clone());
            }
            Err(e) => {
                debug!(uri = %uri, error = %e, "Duration probe failed");
                batch.failed.push(uri.clone());
            }
        }
    }
    batch
}

fn clear_in_flight(flag: &Mutex<bool>) {
    *flag.lock().unwrap_or_else(PoisonError::into_inner) = false;
}

fn apply_batch(state: &mut EngineState, batch: DurationBatch) {
    for (uri, duration) in batch.resolved {
        state.blacklist.record_success(&uri);
        let updated: usize = state
            .repository
            .playlists_mut()
            .values_mut()
            .map(|p| p.fill_duration(&uri, duration))
            .sum();
        debug!(uri = %uri, duration, entries = updated, "Duration resolved");
    }
    for uri in batch.failed {
        let failures = state.blacklist.record_failure(&uri);
        if failures == MAX_PROBE_FAILURES {
            warn!(uri = %uri, failures, "Duration unresolvable, no more probing");
        }
    }
}

/// Drains persistence requests. Runs on the runtime and is the only
/// consumer of worker results.
pub(super) async fn persistence_consumer(
    engine: Weak<EngineInner>,
    mut requests: mpsc::Receiver<PersistRequest>,
) {
    while let Some(request) = requests.recv().await {
        let Some(inner) = engine.upgrade() else {
            break;
        };
        let mut state = inner.state.lock().await;

        if let PersistRequest::Durations(batch) = request {
            info!(
                resolved = batch.resolved.len(),
                failed = batch.failed.len(),
                "Duration resolution finished"
            );
            apply_batch(&mut state, batch);
            clear_in_flight(&inner.resolving);
        }

        if let Err(e) = state.repository.save() {
            warn!(error = %e, "Failed to persist playlists, will retry on next change");
        }
    }
    debug!("Persistence task stopped");
}

impl PlaylistEngine {
    /// Starts a worker probing every missing duration of the main lists and
    /// today's pre-rolls, unless one is already running.
    pub(super) fn scan_durations(&self, state: &EngineState) {
        let today = today_index();
        let mut seen = HashSet::new();
        let pending: Vec<String> = state
            .repository
            .playlists()
            .values()
            .flat_map(|p| p.files.iter().chain(p.pre_list_for(today)))
            .filter(|e| e.duration.is_none() && !state.blacklist.is_blocked(&e.uri))
            .filter(|e| seen.insert(e.uri.clone()))
            .map(|e| e.uri.clone())
            .collect();
        if pending.is_empty() {
            return;
        }

        {
            let mut running = self
                .inner
                .resolving
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *running {
                debug!("Duration resolution already running");
                return;
            }
            *running = true;
        }

        let count = pending.len();
        let prober = self.inner.prober.clone();
        let results = self.inner.persist_tx.clone();
        let resolving = self.inner.resolving.clone();
        let spawned = std::thread::Builder::new()
            .name("duration-probe".to_string())
            .spawn(move || {
                let batch = probe_all(prober.as_ref(), &pending);
                if results.blocking_send(PersistRequest::Durations(batch)).is_err() {
                    warn!("Persistence task gone, duration results dropped");
                    clear_in_flight(&resolving);
                }
            });

        match spawned {
            Ok(_) => info!(uris = count, "Duration resolution started"),
            Err(e) => {
                error!(error = %e, "Cannot start duration worker");
                clear_in_flight(&self.inner.resolving);
            }
        }
    }

    /// Probes the file about to play, inline.
    pub(super) fn resolve_now(&self, state: &mut EngineState, uri: &str) -> Option<u64> {
        if state.blacklist.is_blocked(uri) {
            debug!(uri = %uri, "Duration blacklisted, not probing");
            return None;
        }

        match self.inner.prober.probe(uri) {
            Ok(Some(duration)) => {
                state.blacklist.record_success(uri);
                for playlist in state.repository.playlists_mut().values_mut() {
                    playlist.fill_duration(uri, duration);
                }
                self.request_save();
                Some(duration)
            }
            Ok(None) => {
                state.blacklist.record_failure(uri);
                warn!(uri = %uri, "No duration for playing file");
                None
            }
            Err(e) => {
                state.blacklist.record_failure(uri);
                warn!(uri = %uri, error = %e, "Duration probe failed for playing file");
                None
            }
        }
    }
}
