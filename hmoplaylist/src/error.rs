//! Engine errors and the structured reply handed to callers.

use hmodevice::DeviceError;
use serde::Serialize;
use serde_json::Value;

use crate::state::CursorError;
use crate::store::StoreError;

/// Code carried by every failed reply.
pub const ERROR_CODE: i32 = -1;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Playlist not found: {0}")]
    NotFound(String),

    #[error("Playlist {0} is already playing")]
    AlreadyPlaying(String),

    #[error("Playlist {0} is empty")]
    Empty(String),

    #[error("Playlist {0} has no device")]
    NoDevice(String),

    #[error("Playlist {0} has no previous item")]
    NoPredecessor(String),

    #[error("Playlist {0} has nothing left to play")]
    Exhausted(String),

    #[error("No playlist bound to button {0}")]
    UnboundButton(String),

    #[error("No active playlist bound to button {0}")]
    NothingActive(String),

    #[error("Unknown button action '{0}'")]
    InvalidAction(String),

    #[error("Volume must be between 0 and 100, got {0}")]
    InvalidVolume(u32),

    #[error("Invalid playlist: {0}")]
    InvalidPlaylist(String),

    /// The device refused the command; the message is the device's own.
    #[error("{source}")]
    Device {
        id: String,
        #[source]
        source: DeviceError,
    },

    #[error("Failed to stop {}", .0.join("; "))]
    StopFailures(Vec<String>),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub(crate) fn device(id: &str, source: DeviceError) -> Self {
        EngineError::Device {
            id: id.to_string(),
            source,
        }
    }

    pub(crate) fn from_cursor(id: &str, err: CursorError) -> Self {
        let id = id.to_string();
        match err {
            CursorError::Empty => EngineError::Empty(id),
            CursorError::NoPredecessor => EngineError::NoPredecessor(id),
            CursorError::Exhausted => EngineError::Exhausted(id),
        }
    }

    pub fn code(&self) -> i32 {
        ERROR_CODE
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Result shape of every engine operation at the exterior boundary.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reply {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Reply {
    pub fn success(data: Option<Value>) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

impl From<&EngineError> for Reply {
    fn from(err: &EngineError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            data: None,
        }
    }
}

impl<T: Serialize> From<Result<T>> for Reply {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Reply::success(serde_json::to_value(value).ok().filter(|v| !v.is_null())),
            Err(err) => Reply::from(&err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_message_is_verbatim() {
        let err = EngineError::device(
            "p1",
            DeviceError::Rejected {
                code: 7,
                message: "speaker busy".into(),
            },
        );
        let reply = Reply::from(Err::<(), _>(err));
        assert_eq!(reply.code, -1);
        assert_eq!(reply.message, "speaker busy");
    }

    #[test]
    fn success_carries_data() {
        let reply = Reply::from(Ok::<_, EngineError>(vec!["p1"]));
        assert!(reply.is_success());
        assert_eq!(reply.data, Some(serde_json::json!(["p1"])));

        let unit = Reply::from(Ok::<_, EngineError>(()));
        assert_eq!(unit.data, None);
    }
}
