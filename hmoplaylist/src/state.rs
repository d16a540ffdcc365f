//! Playback cursor over today's pre-roll and the main list.

use serde::Serialize;

use crate::model::{FileEntry, Playlist};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorError {
    /// Neither list has anything to play.
    Empty,
    /// Stepping back from the first item.
    NoPredecessor,
    /// Pre-roll consumed and no main list to fall through to.
    Exhausted,
}

/// Where playback is within a playlist. Lives from the first `play` to
/// `stop`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlayState {
    pub in_pre_files: bool,
    pub pre_index: usize,
    pub file_index: usize,
}

impl PlayState {
    /// Starting point: pre-roll first when today has one, the persisted
    /// main list position otherwise.
    pub fn fresh(playlist: &Playlist, weekday: usize) -> Self {
        let file_index = if playlist.current_index < playlist.files.len() {
            playlist.current_index
        } else {
            0
        };
        Self {
            in_pre_files: !playlist.pre_list_for(weekday).is_empty(),
            pre_index: 0,
            file_index,
        }
    }

    /// Falls through an exhausted pre-roll and keeps `file_index` in range
    /// after the lists were edited.
    pub fn normalize(&mut self, playlist: &Playlist, weekday: usize) {
        if self.in_pre_files && self.pre_index >= playlist.pre_list_for(weekday).len() {
            self.in_pre_files = false;
            self.pre_index = 0;
        }
        if self.file_index >= playlist.files.len() {
            self.file_index = 0;
        }
    }

    pub fn current<'a>(&self, playlist: &'a Playlist, weekday: usize) -> Option<&'a FileEntry> {
        if self.in_pre_files {
            playlist.pre_list_for(weekday).get(self.pre_index)
        } else {
            playlist.files.get(self.file_index)
        }
    }

    /// Moves to the next item. The main list is cyclic; the pre-roll is
    /// not and hands over to the main list at its last position.
    pub fn advance(&mut self, playlist: &Playlist, weekday: usize) -> Result<(), CursorError> {
        if self.in_pre_files {
            self.pre_index += 1;
            if self.pre_index < playlist.pre_list_for(weekday).len() {
                return Ok(());
            }
            self.in_pre_files = false;
            self.pre_index = 0;
            if playlist.files.is_empty() {
                return Err(CursorError::Exhausted);
            }
            if self.file_index >= playlist.files.len() {
                self.file_index = 0;
            }
            return Ok(());
        }

        if playlist.files.is_empty() {
            return Err(CursorError::Empty);
        }
        self.file_index = (self.file_index + 1) % playlist.files.len();
        Ok(())
    }

    /// Moves to the previous item. Before the first main list item comes
    /// the end of today's pre-roll.
    pub fn retreat(&mut self, playlist: &Playlist, weekday: usize) -> Result<(), CursorError> {
        let pre = playlist.pre_list_for(weekday);

        if self.in_pre_files {
            if self.pre_index == 0 {
                return Err(CursorError::NoPredecessor);
            }
            self.pre_index -= 1;
            return Ok(());
        }

        if playlist.files.is_empty() && pre.is_empty() {
            return Err(CursorError::Empty);
        }
        if self.file_index > 0 {
            self.file_index -= 1;
            return Ok(());
        }
        if pre.is_empty() {
            return Err(CursorError::NoPredecessor);
        }
        self.in_pre_files = true;
        self.pre_index = pre.len() - 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: usize = 2;

    fn playlist(pre: &[&str], files: &[&str]) -> Playlist {
        let mut p = Playlist::new("p", "P");
        p.pre_lists[DAY] = pre.iter().map(|u| FileEntry::new(u)).collect();
        p.files = files.iter().map(|u| FileEntry::new(u)).collect();
        p
    }

    fn uri(state: &PlayState, p: &Playlist) -> String {
        state.current(p, DAY).unwrap().uri.clone()
    }

    #[test]
    fn fresh_starts_with_todays_pre_roll() {
        let p = playlist(&["pre.mp3"], &["f1.mp3"]);
        let state = PlayState::fresh(&p, DAY);
        assert!(state.in_pre_files);
        assert_eq!(uri(&state, &p), "pre.mp3");

        let other_day = PlayState::fresh(&p, DAY + 1);
        assert!(!other_day.in_pre_files);
    }

    #[test]
    fn fresh_clamps_a_stale_cursor() {
        let mut p = playlist(&[], &["a", "b"]);
        p.current_index = 1;
        assert_eq!(PlayState::fresh(&p, DAY).file_index, 1);
        p.current_index = 7;
        assert_eq!(PlayState::fresh(&p, DAY).file_index, 0);
    }

    #[test]
    fn pre_roll_hands_over_without_wrapping() {
        let mut p = playlist(&["pre1", "pre2"], &["a", "b", "c"]);
        p.current_index = 2;
        let mut state = PlayState::fresh(&p, DAY);

        state.advance(&p, DAY).unwrap();
        assert_eq!(uri(&state, &p), "pre2");
        state.advance(&p, DAY).unwrap();
        assert_eq!(uri(&state, &p), "c");
        state.advance(&p, DAY).unwrap();
        assert_eq!(uri(&state, &p), "a");
    }

    #[test]
    fn main_list_is_cyclic() {
        let p = playlist(&[], &["a", "b", "c"]);
        let mut state = PlayState::fresh(&p, DAY);
        for _ in 0..p.files.len() {
            state.advance(&p, DAY).unwrap();
        }
        assert_eq!(state.file_index, 0);
    }

    #[test]
    fn retreat_falls_back_into_pre_roll() {
        let p = playlist(&["pre1", "pre2"], &["a"]);
        let mut state = PlayState {
            in_pre_files: false,
            pre_index: 0,
            file_index: 0,
        };
        state.retreat(&p, DAY).unwrap();
        assert_eq!(uri(&state, &p), "pre2");
        state.retreat(&p, DAY).unwrap();
        assert_eq!(uri(&state, &p), "pre1");
        assert_eq!(state.retreat(&p, DAY), Err(CursorError::NoPredecessor));
    }

    #[test]
    fn no_predecessor_without_pre_roll() {
        let p = playlist(&[], &["a", "b"]);
        let mut state = PlayState::fresh(&p, DAY);
        assert_eq!(state.retreat(&p, DAY), Err(CursorError::NoPredecessor));
        assert_eq!(state.file_index, 0);
    }

    #[test]
    fn pre_roll_only_playlist_is_exhausted() {
        let p = playlist(&["pre"], &[]);
        let mut state = PlayState::fresh(&p, DAY);
        assert_eq!(state.advance(&p, DAY), Err(CursorError::Exhausted));
    }

    #[test]
    fn normalize_drops_a_consumed_pre_roll() {
        let p = playlist(&["pre"], &["a", "b"]);
        let mut state = PlayState {
            in_pre_files: true,
            pre_index: 4,
            file_index: 9,
        };
        state.normalize(&p, DAY);
        assert!(!state.in_pre_files);
        assert_eq!(uri(&state, &p), "a");
    }
}
