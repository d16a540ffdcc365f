//! Device adapter contract shared by every device family.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::DeviceError;

/// Playback state reported by a device, normalised across protocols.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceState {
    Playing,
    Paused,
    Stopped,
    Transitioning,
    Unknown(String),
}

impl DeviceState {
    /// Maps the protocol specific state strings (`PLAYING`, `play`,
    /// `PAUSED_PLAYBACK`, `NO_MEDIA_PRESENT`...) to a logical state.
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "playing" | "play" => DeviceState::Playing,
            "paused" | "pause" | "paused_playback" => DeviceState::Paused,
            "stopped" | "stop" | "no_media_present" | "idle" => DeviceState::Stopped,
            "transitioning" | "load" | "loading" | "buffering" => DeviceState::Transitioning,
            other => DeviceState::Unknown(other.to_string()),
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, DeviceState::Stopped)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Playing => f.write_str("playing"),
            DeviceState::Paused => f.write_str("paused"),
            DeviceState::Stopped => f.write_str("stopped"),
            DeviceState::Transitioning => f.write_str("transitioning"),
            DeviceState::Unknown(raw) => write!(f, "unknown({raw})"),
        }
    }
}

/// Live status of a device. Durations and positions are in whole seconds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceStatus {
    pub state: DeviceState,
    pub duration: Option<u64>,
    pub position: Option<u64>,
}

impl DeviceStatus {
    pub fn stopped() -> Self {
        Self {
            state: DeviceState::Stopped,
            duration: None,
            position: None,
        }
    }

    /// Seconds left in the current item, when the device reports both
    /// duration and position.
    pub fn remaining(&self) -> Option<u64> {
        match (self.duration, self.position) {
            (Some(duration), Some(position)) => Some(duration.saturating_sub(position)),
            _ => None,
        }
    }
}

/// Device binding as stored with a playlist.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceBinding {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub name: String,
}

impl DeviceBinding {
    pub fn new(kind: &str, address: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            address: address.to_string(),
            name: name.to_string(),
        }
    }

    /// A binding with no type means the playlist has no output device.
    pub fn is_unbound(&self) -> bool {
        self.kind.trim().is_empty()
    }
}

/// Capability interface every output device exposes to the playlist engine.
///
/// Calls are blocking and expected to be short (one HTTP round trip or two).
/// An `Err` is the device refusing or failing the command; its `Display`
/// is the message surfaced to callers.
pub trait DeviceAdapter: Send + Sync + fmt::Debug {
    /// Starts playback of `uri`, replacing whatever the device is playing.
    fn play(&self, uri: &str) -> Result<(), DeviceError>;

    fn stop(&self) -> Result<(), DeviceError>;

    fn get_status(&self) -> Result<DeviceStatus, DeviceError>;

    /// Sets the output volume, 0 to 100.
    fn set_volume(&self, volume: u8) -> Result<(), DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_states_are_normalised() {
        assert_eq!(DeviceState::from_raw("PLAYING"), DeviceState::Playing);
        assert_eq!(DeviceState::from_raw("play"), DeviceState::Playing);
        assert_eq!(DeviceState::from_raw("PAUSED_PLAYBACK"), DeviceState::Paused);
        assert_eq!(DeviceState::from_raw("NO_MEDIA_PRESENT"), DeviceState::Stopped);
        assert_eq!(DeviceState::from_raw("load"), DeviceState::Transitioning);
        assert_eq!(
            DeviceState::from_raw("weird"),
            DeviceState::Unknown("weird".into())
        );
    }

    #[test]
    fn remaining_needs_both_fields() {
        let mut status = DeviceStatus {
            state: DeviceState::Playing,
            duration: Some(200),
            position: Some(197),
        };
        assert_eq!(status.remaining(), Some(3));

        status.position = None;
        assert_eq!(status.remaining(), None);
    }

    #[test]
    fn binding_uses_type_key_on_the_wire() {
        let binding: DeviceBinding =
            serde_json::from_str(r#"{"type":"dlna","address":"http://x/ctl","name":"Kitchen"}"#)
                .unwrap();
        assert_eq!(binding.kind, "dlna");
        assert!(!binding.is_unbound());

        let json = serde_json::to_value(&binding).unwrap();
        assert_eq!(json["type"], "dlna");

        let empty: DeviceBinding = serde_json::from_str("{}").unwrap();
        assert!(empty.is_unbound());
    }
}
