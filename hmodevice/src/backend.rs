//! Device families and the factory turning a stored binding into an adapter.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::adapter::{DeviceAdapter, DeviceBinding, DeviceStatus};
use crate::agent::AgentClient;
use crate::dlna::DlnaRenderer;
use crate::errors::DeviceError;
use crate::linkplay::SpeakerRenderer;

/// Device family tag stored in `device.type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Dlna,
    BluetoothAgent,
    Speaker,
    GenericAgent,
}

impl FromStr for DeviceKind {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dlna" | "upnp" => Ok(DeviceKind::Dlna),
            "bluetooth" | "bluetooth-agent" | "bt" => Ok(DeviceKind::BluetoothAgent),
            "speaker" | "proprietary-speaker" | "linkplay" => Ok(DeviceKind::Speaker),
            "agent" | "generic-agent" => Ok(DeviceKind::GenericAgent),
            _ => Err(DeviceError::UnknownType(s.to_string())),
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceKind::Dlna => "dlna",
            DeviceKind::BluetoothAgent => "bluetooth-agent",
            DeviceKind::Speaker => "speaker",
            DeviceKind::GenericAgent => "agent",
        })
    }
}

/// Settings shared by all adapters built by [`DefaultAdapterFactory`].
#[derive(Clone, Debug)]
pub struct DeviceSettings {
    pub http_timeout: Duration,
    pub bluetooth_agent_url: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(5),
            bluetooth_agent_url: "http://127.0.0.1:8765".to_string(),
        }
    }
}

/// One variant per supported device family.
#[derive(Clone, Debug)]
pub enum DeviceBackend {
    /// UPnP AV / DLNA renderer (AVTransport + RenderingControl).
    Dlna(DlnaRenderer),
    /// Bluetooth sink driven through the local agent.
    BluetoothAgent(AgentClient),
    /// LinkPlay-style network speaker.
    Speaker(SpeakerRenderer),
    /// Any other output reachable through an HTTP agent.
    GenericAgent(AgentClient),
}

impl DeviceBackend {
    pub fn from_binding(
        binding: &DeviceBinding,
        settings: &DeviceSettings,
    ) -> Result<Self, DeviceError> {
        let timeout = settings.http_timeout;
        match binding.kind.parse::<DeviceKind>()? {
            DeviceKind::Dlna => Ok(DeviceBackend::Dlna(DlnaRenderer::new(
                &binding.address,
                timeout,
            )?)),
            DeviceKind::BluetoothAgent => Ok(DeviceBackend::BluetoothAgent(
                AgentClient::bluetooth(&settings.bluetooth_agent_url, &binding.address, timeout)?,
            )),
            DeviceKind::Speaker => Ok(DeviceBackend::Speaker(SpeakerRenderer::new(
                &binding.address,
                timeout,
            )?)),
            DeviceKind::GenericAgent => Ok(DeviceBackend::GenericAgent(AgentClient::generic(
                &binding.address,
                timeout,
            )?)),
        }
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            DeviceBackend::Dlna(_) => DeviceKind::Dlna,
            DeviceBackend::BluetoothAgent(_) => DeviceKind::BluetoothAgent,
            DeviceBackend::Speaker(_) => DeviceKind::Speaker,
            DeviceBackend::GenericAgent(_) => DeviceKind::GenericAgent,
        }
    }

    fn inner(&self) -> &dyn DeviceAdapter {
        match self {
            DeviceBackend::Dlna(r) => r,
            DeviceBackend::BluetoothAgent(a) | DeviceBackend::GenericAgent(a) => a,
            DeviceBackend::Speaker(s) => s,
        }
    }
}

impl DeviceAdapter for DeviceBackend {
    fn play(&self, uri: &str) -> Result<(), DeviceError> {
        self.inner().play(uri)
    }

    fn stop(&self) -> Result<(), DeviceError> {
        self.inner().stop()
    }

    fn get_status(&self) -> Result<DeviceStatus, DeviceError> {
        self.inner().get_status()
    }

    fn set_volume(&self, volume: u8) -> Result<(), DeviceError> {
        self.inner().set_volume(volume)
    }
}

/// Builds the adapter bound to a playlist.
///
/// The engine only sees this trait, so tests can hand it recording fakes.
pub trait AdapterFactory: Send + Sync {
    fn build(&self, binding: &DeviceBinding) -> Result<Arc<dyn DeviceAdapter>, DeviceError>;
}

/// Factory producing the real network adapters.
#[derive(Clone, Debug, Default)]
pub struct DefaultAdapterFactory {
    settings: DeviceSettings,
}

impl DefaultAdapterFactory {
    pub fn new(settings: DeviceSettings) -> Self {
        Self { settings }
    }
}

impl AdapterFactory for DefaultAdapterFactory {
    fn build(&self, binding: &DeviceBinding) -> Result<Arc<dyn DeviceAdapter>, DeviceError> {
        let backend = DeviceBackend::from_binding(binding, &self.settings)?;
        debug!(kind = %backend.kind(), address = %binding.address, "Device backend built");
        Ok(Arc::new(backend))
    }
}
