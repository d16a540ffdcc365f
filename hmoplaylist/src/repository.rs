//! Playlist repository: the in-memory document and its persisted copy.

use std::sync::Arc;

use tracing::{debug, info};

use crate::model::{Playlist, Playlists};
use crate::store::{KeyValueStore, StoreError};

/// Owns the playlist document. The in-memory copy stays authoritative
/// when the store cannot be reached; the next successful save catches up.
pub struct PlaylistRepository {
    store: Arc<dyn KeyValueStore>,
    key: String,
    playlists: Playlists,
}

impl std::fmt::Debug for PlaylistRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaylistRepository")
            .field("key", &self.key)
            .field("playlists", &self.playlists.len())
            .finish()
    }
}

impl PlaylistRepository {
    pub fn new(store: Arc<dyn KeyValueStore>, key: &str) -> Self {
        Self {
            store,
            key: key.to_string(),
            playlists: Playlists::new(),
        }
    }

    /// Reads the document, migrates old layouts and clears the playing
    /// flags left by a previous run.
    pub fn load(&mut self) -> Result<&Playlists, StoreError> {
        let raw = self.store.get(&self.key)?;
        let mut playlists: Playlists = match raw.as_deref().map(str::trim) {
            None | Some("") => Playlists::new(),
            Some(json) => {
                serde_json::from_str(json).map_err(|e| StoreError::Document(e.to_string()))?
            }
        };

        let mut migrated = 0;
        for (id, playlist) in playlists.iter_mut() {
            if playlist.id != *id {
                playlist.id = id.clone();
            }
            if playlist.migrate() {
                migrated += 1;
            }
            playlist.is_playing = false;
        }

        info!(
            key = %self.key,
            playlists = playlists.len(),
            migrated,
            "Playlists loaded"
        );
        self.playlists = playlists;
        Ok(&self.playlists)
    }

    /// Writes the whole in-memory document.
    pub fn save(&self) -> Result<(), StoreError> {
        let json = serde_json::to_string(&self.playlists)
            .map_err(|e| StoreError::Document(e.to_string()))?;
        self.store.set(&self.key, &json)?;
        debug!(key = %self.key, playlists = self.playlists.len(), "Playlists saved");
        Ok(())
    }

    /// Replaces the whole document, then saves it.
    pub fn save_all(&mut self, playlists: Playlists) -> Result<(), StoreError> {
        self.playlists = playlists;
        self.save()
    }

    /// Inserts or replaces one playlist, then saves the document.
    pub fn save_single(&mut self, playlist: Playlist) -> Result<(), StoreError> {
        self.playlists.insert(playlist.id.clone(), playlist);
        self.save()
    }

    /// Drops one playlist, then saves the document.
    pub fn remove(&mut self, id: &str) -> Result<Option<Playlist>, StoreError> {
        let removed = self.playlists.remove(id);
        if removed.is_some() {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn playlists(&self) -> &Playlists {
        &self.playlists
    }

    pub fn playlists_mut(&mut self) -> &mut Playlists {
        &mut self.playlists
    }

    pub fn get(&self, id: &str) -> Option<&Playlist> {
        self.playlists.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Playlist> {
        self.playlists.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.playlists.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileEntry, WEEK_DAYS};
    use crate::store::MemoryStore;

    fn repository(store: &MemoryStore) -> PlaylistRepository {
        PlaylistRepository::new(Arc::new(store.clone()), "playlists")
    }

    #[test]
    fn missing_document_loads_empty() {
        let store = MemoryStore::new();
        assert!(repository(&store).load().unwrap().is_empty());
    }

    #[test]
    fn load_migrates_and_clears_playing_flags() {
        let store = MemoryStore::new();
        store
            .set(
                "playlists",
                r#"{"morning":{"name":"Morning","files":[{"uri":"a.mp3","duration":12}],
                    "pre_files":[{"uri":"hello.mp3"}],"is_playing":true,
                    "schedule":{"enabled":1,"cron":"0 7 * * *","duration":0}}}"#,
            )
            .unwrap();

        let mut repo = repository(&store);
        let playlists = repo.load().unwrap();
        let morning = &playlists["morning"];
        assert_eq!(morning.id, "morning");
        assert!(!morning.is_playing);
        assert_eq!(morning.pre_lists.len(), WEEK_DAYS);
        assert_eq!(morning.pre_list_for(3), &[FileEntry::new("hello.mp3")]);
        assert_eq!(morning.files[0].duration, Some(12));
        assert!(morning.schedule.enabled);
    }

    #[test]
    fn save_single_merges_into_document() {
        let store = MemoryStore::new();
        let mut repo = repository(&store);
        repo.save_all(Playlists::from([("a".to_string(), Playlist::new("a", "A"))]))
            .unwrap();
        repo.save_single(Playlist::new("b", "B")).unwrap();

        let mut reloaded = repository(&store);
        let playlists = reloaded.load().unwrap();
        assert_eq!(playlists.keys().collect::<Vec<_>>(), ["a", "b"]);
    }

    #[test]
    fn failed_save_keeps_memory_authoritative() {
        let store = MemoryStore::new();
        let mut repo = repository(&store);
        store.set_unavailable(true);
        assert!(repo.save_single(Playlist::new("a", "A")).is_err());
        assert!(repo.contains("a"));

        store.set_unavailable(false);
        repo.save().unwrap();
        assert!(repository(&store).load().unwrap().contains_key("a"));
    }

    #[test]
    fn corrupt_document_is_reported() {
        let store = MemoryStore::new();
        store.set("playlists", "[not json").unwrap();
        assert!(matches!(
            repository(&store).load(),
            Err(StoreError::Document(_))
        ));
    }
}
