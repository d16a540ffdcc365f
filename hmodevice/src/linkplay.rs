//! Proprietary network speakers speaking the LinkPlay HTTP API.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use ureq::Agent;

use crate::adapter::{DeviceAdapter, DeviceState, DeviceStatus};
use crate::errors::DeviceError;
use crate::time_utils::ms_to_seconds;

const STATUS_COMMAND: &str = "getPlayerStatus";

/// Raw response from the `getPlayerStatus` command.
#[derive(Debug, Deserialize)]
struct LinkPlayStatusRaw {
    status: String,
    curpos: String,
    totlen: String,
}

#[derive(Clone)]
pub struct SpeakerRenderer {
    host: String,
    timeout: Duration,
}

impl fmt::Debug for SpeakerRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeakerRenderer")
            .field("host", &self.host)
            .finish()
    }
}

impl SpeakerRenderer {
    /// `address` is the speaker's host, optionally with a port or an
    /// `http://` prefix.
    pub fn new(address: &str, timeout: Duration) -> Result<Self, DeviceError> {
        let host = extract_host(address).ok_or_else(|| DeviceError::MissingAddress(address.to_string()))?;
        Ok(Self { host, timeout })
    }

    fn agent(&self) -> Agent {
        Agent::config_builder()
            .timeout_global(Some(self.timeout))
            .build()
            .into()
    }

    fn command(&self, command: &str) -> Result<String, DeviceError> {
        let url = format!("http://{}/httpapi.asp?command={}", self.host, command);
        let mut response = self
            .agent()
            .get(&url)
            .call()
            .map_err(|e| DeviceError::http(&self.host, e))?;
        response
            .body_mut()
            .read_to_string()
            .map_err(|e| DeviceError::http(&self.host, e))
    }

    fn player_command(&self, command: &str) -> Result<(), DeviceError> {
        let body = self.command(&format!("setPlayerCmd:{}", command))?;
        check_ok(&body)
    }
}

fn check_ok(body: &str) -> Result<(), DeviceError> {
    match body.trim() {
        "OK" | "ok" => Ok(()),
        other => Err(DeviceError::Rejected {
            code: -1,
            message: format!("speaker refused command: {}", other),
        }),
    }
}

fn extract_host(address: &str) -> Option<String> {
    let rest = match address.split_once("://") {
        Some((_, rest)) => rest,
        None => address,
    };
    let host = rest.split('/').next().unwrap_or(rest).trim();
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char);
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

fn parse_status(body: &str) -> Result<DeviceStatus, DeviceError> {
    let raw: LinkPlayStatusRaw = serde_json::from_str(body)
        .map_err(|e| DeviceError::Parsing(format!("LinkPlay status JSON: {}", e)))?;

    let curpos_ms = raw
        .curpos
        .parse::<u64>()
        .map_err(|_| DeviceError::Parsing(format!("invalid curpos value: {}", raw.curpos)))?;
    let totlen_ms = raw
        .totlen
        .parse::<u64>()
        .map_err(|_| DeviceError::Parsing(format!("invalid totlen value: {}", raw.totlen)))?;

    Ok(DeviceStatus {
        state: DeviceState::from_raw(&raw.status),
        duration: Some(ms_to_seconds(totlen_ms)).filter(|d| *d > 0),
        position: Some(ms_to_seconds(curpos_ms)),
    })
}

impl DeviceAdapter for SpeakerRenderer {
    fn play(&self, uri: &str) -> Result<(), DeviceError> {
        self.player_command(&format!("play:{}", percent_encode(uri)))
    }

    fn stop(&self) -> Result<(), DeviceError> {
        self.player_command("stop")
    }

    fn get_status(&self) -> Result<DeviceStatus, DeviceError> {
        let body = self.command(STATUS_COMMAND)?;
        parse_status(&body)
    }

    fn set_volume(&self, volume: u8) -> Result<(), DeviceError> {
        self.player_command(&format!("vol:{}", volume.min(100)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_parsed_into_seconds() {
        let body = r#"{"type":"0","ch":"0","mode":"10","loop":"3","eq":"0",
            "status":"play","curpos":"61500","offset_pts":"0","totlen":"240000",
            "vol":"35","mute":"0"}"#;
        let status = parse_status(body).unwrap();
        assert_eq!(status.state, DeviceState::Playing);
        assert_eq!(status.position, Some(61));
        assert_eq!(status.duration, Some(240));
        assert_eq!(status.remaining(), Some(179));
    }

    #[test]
    fn zero_length_means_unknown_duration() {
        let body = r#"{"status":"stop","curpos":"0","totlen":"0"}"#;
        let status = parse_status(body).unwrap();
        assert!(status.state.is_stopped());
        assert_eq!(status.duration, None);
    }

    #[test]
    fn uri_is_percent_encoded() {
        assert_eq!(
            percent_encode("http://nas/a b.mp3"),
            "http%3A%2F%2Fnas%2Fa%20b.mp3"
        );
    }

    #[test]
    fn host_extraction_accepts_urls_and_bare_hosts() {
        assert_eq!(extract_host("192.168.1.20").as_deref(), Some("192.168.1.20"));
        assert_eq!(
            extract_host("http://192.168.1.20:8080/").as_deref(),
            Some("192.168.1.20:8080")
        );
        assert_eq!(extract_host(""), None);
    }

    #[test]
    fn non_ok_answers_are_rejections() {
        assert!(check_ok("OK\n").is_ok());
        assert_eq!(check_ok("Failed").unwrap_err().to_string(), "speaker refused command: Failed");
    }
}
