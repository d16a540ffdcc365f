//! HTTP agents: small companion processes that own a local output (a paired
//! Bluetooth sink, a sound card) and accept JSON commands.
//!
//! Every endpoint answers `{"code": int, "msg": string, "data": ...}` with
//! `code == 0` meaning success.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use ureq::Agent;

use crate::adapter::{DeviceAdapter, DeviceState, DeviceStatus};
use crate::errors::DeviceError;

#[derive(Debug, Deserialize)]
struct AgentReply {
    code: i32,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentStatus {
    #[serde(default)]
    state: String,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    position: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct AgentClient {
    base_url: String,
    /// Sink address forwarded with each command (Bluetooth MAC).
    sink: Option<String>,
    timeout: Duration,
}

impl AgentClient {
    /// Generic agent reachable at `base_url`.
    pub fn generic(base_url: &str, timeout: Duration) -> Result<Self, DeviceError> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            sink: None,
            timeout,
        })
    }

    /// Bluetooth agent at `agent_url`, driving the sink with address `mac`.
    pub fn bluetooth(agent_url: &str, mac: &str, timeout: Duration) -> Result<Self, DeviceError> {
        let mac = mac.trim();
        if mac.is_empty() {
            return Err(DeviceError::MissingAddress("bluetooth sink".to_string()));
        }
        Ok(Self {
            base_url: normalize_base_url(agent_url)?,
            sink: Some(mac.to_string()),
            timeout,
        })
    }

    fn agent(&self) -> Agent {
        Agent::config_builder()
            .timeout_global(Some(self.timeout))
            .build()
            .into()
    }

    fn with_sink(&self, mut body: Value) -> Value {
        if let (Some(sink), Some(map)) = (&self.sink, body.as_object_mut()) {
            map.insert("address".to_string(), Value::String(sink.clone()));
        }
        body
    }

    fn post(&self, path: &str, body: Value) -> Result<Option<Value>, DeviceError> {
        let url = format!("{}{}", self.base_url, path);
        let mut response = self
            .agent()
            .post(&url)
            .send_json(self.with_sink(body))
            .map_err(|e| DeviceError::http(&url, e))?;
        let reply: AgentReply = response
            .body_mut()
            .read_json()
            .map_err(|e| DeviceError::Parsing(format!("agent reply from {}: {}", url, e)))?;
        into_result(reply)
    }

    fn get(&self, path: &str) -> Result<Option<Value>, DeviceError> {
        let mut url = format!("{}{}", self.base_url, path);
        if let Some(sink) = &self.sink {
            url.push_str(&format!("?address={}", sink));
        }
        let mut response = self
            .agent()
            .get(&url)
            .call()
            .map_err(|e| DeviceError::http(&url, e))?;
        let reply: AgentReply = response
            .body_mut()
            .read_json()
            .map_err(|e| DeviceError::Parsing(format!("agent reply from {}: {}", url, e)))?;
        into_result(reply)
    }
}

fn normalize_base_url(url: &str) -> Result<String, DeviceError> {
    let url = url.trim().trim_end_matches('/');
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url.to_string())
    } else {
        Err(DeviceError::MissingAddress(url.to_string()))
    }
}

fn into_result(reply: AgentReply) -> Result<Option<Value>, DeviceError> {
    if reply.code == 0 {
        Ok(reply.data)
    } else {
        Err(DeviceError::Rejected {
            code: reply.code,
            message: reply.msg,
        })
    }
}

fn parse_status(data: Option<Value>) -> Result<DeviceStatus, DeviceError> {
    let status: AgentStatus = match data {
        Some(value) => serde_json::from_value(value)
            .map_err(|e| DeviceError::Parsing(format!("agent status: {}", e)))?,
        None => AgentStatus::default(),
    };

    let state = if status.state.is_empty() {
        DeviceState::Stopped
    } else {
        DeviceState::from_raw(&status.state)
    };

    Ok(DeviceStatus {
        state,
        duration: status.duration.filter(|d| *d > 0.0).map(|d| d.round() as u64),
        position: status.position.filter(|p| *p >= 0.0).map(|p| p.round() as u64),
    })
}

impl DeviceAdapter for AgentClient {
    fn play(&self, uri: &str) -> Result<(), DeviceError> {
        self.post("/play", json!({ "uri": uri }))?;
        Ok(())
    }

    fn stop(&self) -> Result<(), DeviceError> {
        self.post("/stop", json!({}))?;
        Ok(())
    }

    fn get_status(&self) -> Result<DeviceStatus, DeviceError> {
        parse_status(self.get("/status")?)
    }

    fn set_volume(&self, volume: u8) -> Result<(), DeviceError> {
        self.post("/volume", json!({ "volume": volume.min(100) }))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(json: &str) -> AgentReply {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn non_zero_code_surfaces_agent_message() {
        let err = into_result(reply(r#"{"code":3,"msg":"sink not connected"}"#)).unwrap_err();
        assert_eq!(err.to_string(), "sink not connected");
        assert!(matches!(err, DeviceError::Rejected { code: 3, .. }));
    }

    #[test]
    fn status_payload_is_rounded() {
        let data = into_result(reply(
            r#"{"code":0,"msg":"ok","data":{"state":"playing","duration":180.6,"position":12.2}}"#,
        ))
        .unwrap();
        let status = parse_status(data).unwrap();
        assert_eq!(status.state, DeviceState::Playing);
        assert_eq!(status.duration, Some(181));
        assert_eq!(status.position, Some(12));
    }

    #[test]
    fn empty_status_means_stopped() {
        let status = parse_status(None).unwrap();
        assert!(status.state.is_stopped());
    }

    #[test]
    fn bluetooth_commands_carry_the_sink_address() {
        let client =
            AgentClient::bluetooth("http://127.0.0.1:8765/", "AA:BB:CC:DD:EE:FF", Duration::from_secs(1))
                .unwrap();
        let body = client.with_sink(json!({ "uri": "a.mp3" }));
        assert_eq!(body["address"], "AA:BB:CC:DD:EE:FF");
        assert_eq!(client.base_url, "http://127.0.0.1:8765");
    }

    #[test]
    fn bluetooth_requires_a_sink() {
        assert!(AgentClient::bluetooth("http://127.0.0.1:8765", " ", Duration::from_secs(1)).is_err());
        assert!(AgentClient::generic("localhost:9000", Duration::from_secs(1)).is_err());
    }
}
