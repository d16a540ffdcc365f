//! Persisted playlist document.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Local};
use hmodevice::DeviceBinding;
use serde::{Deserialize, Serialize};

/// Number of per-weekday pre-roll lists.
pub const WEEK_DAYS: usize = 7;

/// The whole persisted document, keyed by playlist id.
pub type Playlists = BTreeMap<String, Playlist>;

/// Index into `pre_lists` for a given moment, Monday being `0`.
pub fn weekday_index(now: &DateTime<Local>) -> usize {
    now.weekday().num_days_from_monday() as usize
}

/// Index into `pre_lists` for today.
pub fn today_index() -> usize {
    weekday_index(&Local::now())
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub uri: String,
    /// Cached duration in whole seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

impl FileEntry {
    pub fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            duration: None,
        }
    }

    pub fn with_duration(uri: &str, duration: u64) -> Self {
        Self {
            uri: uri.to_string(),
            duration: Some(duration),
        }
    }

    /// Records a duration unless one is already cached.
    pub fn fill_duration(&mut self, duration: u64) -> bool {
        if self.duration.is_none() {
            self.duration = Some(duration);
            true
        } else {
            false
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default, with = "flag")]
    pub enabled: bool,
    #[serde(default)]
    pub cron: String,
    /// Session limit in minutes, `0` for none.
    #[serde(default)]
    pub duration: u64,
}

impl Schedule {
    pub fn cron(expression: &str) -> Self {
        Self {
            enabled: true,
            cron: expression.to_string(),
            duration: 0,
        }
    }

    /// Whether a cron job should be registered for this schedule.
    pub fn is_armed(&self) -> bool {
        self.enabled && !self.cron.trim().is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub pre_lists: Vec<Vec<FileEntry>>,
    #[serde(default)]
    pub current_index: usize,
    #[serde(default)]
    pub device: DeviceBinding,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_volume: Option<u8>,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_button: Option<String>,
    /// Set while the engine considers the playlist active. Never trusted
    /// after a restart.
    #[serde(default)]
    pub is_playing: bool,
    /// Flat pre-roll list from documents predating per-day lists.
    #[serde(default, skip_serializing)]
    pub pre_files: Vec<FileEntry>,
}

impl Playlist {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            pre_lists: vec![Vec::new(); WEEK_DAYS],
            ..Default::default()
        }
    }

    /// Pre-roll for `weekday`. A malformed `pre_lists` yields nothing.
    pub fn pre_list_for(&self, weekday: usize) -> &[FileEntry] {
        if self.pre_lists.len() == WEEK_DAYS {
            self.pre_lists.get(weekday).map(Vec::as_slice).unwrap_or(&[])
        } else {
            &[]
        }
    }

    /// Nothing to play on `weekday`.
    pub fn is_empty_on(&self, weekday: usize) -> bool {
        self.files.is_empty() && self.pre_list_for(weekday).is_empty()
    }

    /// Brings a document from an older layout up to date. Returns whether
    /// anything changed.
    pub fn migrate(&mut self) -> bool {
        if self.pre_lists.len() == WEEK_DAYS && self.pre_files.is_empty() {
            return false;
        }
        if self.pre_lists.len() != WEEK_DAYS {
            self.pre_lists = vec![self.pre_files.clone(); WEEK_DAYS];
        }
        self.pre_files.clear();
        true
    }

    /// Every entry, main list and all pre-roll days.
    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut FileEntry> {
        self.files
            .iter_mut()
            .chain(self.pre_lists.iter_mut().flatten())
    }

    /// Fills the cached duration of every entry pointing at `uri`.
    pub fn fill_duration(&mut self, uri: &str, duration: u64) -> usize {
        self.entries_mut()
            .filter(|e| e.uri == uri)
            .map(|e| e.fill_duration(duration))
            .filter(|changed| *changed)
            .count()
    }
}

/// `schedule.enabled` is stored as `0`/`1`; booleans are accepted too.
mod flag {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Bool(b) => Ok(b),
            Raw::Int(i) => Ok(i != 0),
            Raw::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" | "" => Ok(false),
                other => Err(D::Error::custom(format!("invalid flag '{}'", other))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn schedule_flag_accepts_ints_and_bools() {
        let s: Schedule = serde_json::from_str(r#"{"enabled":1,"cron":"0 7 * * *","duration":30}"#).unwrap();
        assert!(s.enabled);
        let s: Schedule = serde_json::from_str(r#"{"enabled":false,"cron":""}"#).unwrap();
        assert!(!s.enabled);
        assert_eq!(serde_json::to_value(Schedule::cron("x")).unwrap()["enabled"], 1);
    }

    #[test]
    fn armed_needs_an_expression() {
        let mut s = Schedule::cron("  ");
        assert!(!s.is_armed());
        s.cron = "0 7 * * *".into();
        assert!(s.is_armed());
        s.enabled = false;
        assert!(!s.is_armed());
    }

    #[test]
    fn malformed_pre_lists_read_as_empty() {
        let mut p = Playlist::new("p", "P");
        p.pre_lists = vec![vec![FileEntry::new("a.mp3")]];
        assert!(p.pre_list_for(0).is_empty());
        assert!(p.is_empty_on(0));
    }

    #[test]
    fn legacy_pre_files_spread_over_the_week() {
        let mut p: Playlist = serde_json::from_str(
            r#"{"id":"p","files":[],"pre_files":[{"uri":"jingle.mp3"}]}"#,
        )
        .unwrap();
        assert!(p.migrate());
        assert_eq!(p.pre_lists.len(), WEEK_DAYS);
        for day in 0..WEEK_DAYS {
            assert_eq!(p.pre_list_for(day)[0].uri, "jingle.mp3");
        }
        assert!(!p.migrate());
        assert!(serde_json::to_value(&p).unwrap().get("pre_files").is_none());
    }

    #[test]
    fn cached_durations_are_kept() {
        let mut p = Playlist::new("p", "P");
        p.files = vec![FileEntry::with_duration("a.mp3", 10), FileEntry::new("a.mp3")];
        p.pre_lists[2].push(FileEntry::new("a.mp3"));
        assert_eq!(p.fill_duration("a.mp3", 99), 2);
        assert_eq!(p.files[0].duration, Some(10));
        assert_eq!(p.files[1].duration, Some(99));
        assert_eq!(p.pre_lists[2][0].duration, Some(99));
    }

    #[test]
    fn monday_is_day_zero() {
        // 2026-10-19 is a Monday
        let monday = Local.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        assert_eq!(weekday_index(&monday), 0);
        let sunday = Local.with_ymd_and_hms(2026, 10, 25, 9, 0, 0).unwrap();
        assert_eq!(weekday_index(&sunday), 6);
    }
}
