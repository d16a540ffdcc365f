//! # hmodevice - output devices for the playlist engine
//!
//! Every output device, whatever its protocol, is driven through the
//! [`DeviceAdapter`] contract: `play(uri)`, `stop()`, `get_status()` and
//! `set_volume(volume)`. The stored `device.type` tag is mapped to a
//! [`DeviceKind`] and the [`DefaultAdapterFactory`] builds the matching
//! [`DeviceBackend`]:
//!
//! - `dlna`: UPnP AV renderer, SOAP over HTTP
//! - `bluetooth`: Bluetooth sink driven by the local agent process
//! - `speaker`: LinkPlay-style network speaker
//! - `agent`: any other HTTP agent
//!
//! ```no_run
//! use hmodevice::{AdapterFactory, DefaultAdapterFactory, DeviceBinding};
//!
//! let factory = DefaultAdapterFactory::default();
//! let speaker = factory.build(&DeviceBinding::new("speaker", "192.168.1.20", "Kitchen"))?;
//! speaker.set_volume(30)?;
//! speaker.play("http://nas.local/music/a.mp3")?;
//! # Ok::<(), hmodevice::DeviceError>(())
//! ```

pub mod adapter;
pub mod agent;
pub mod backend;
pub mod dlna;
pub mod errors;
pub mod linkplay;
pub mod soap;
pub mod time_utils;

pub use adapter::{DeviceAdapter, DeviceBinding, DeviceState, DeviceStatus};
pub use agent::AgentClient;
pub use backend::{AdapterFactory, DefaultAdapterFactory, DeviceBackend, DeviceKind, DeviceSettings};
pub use dlna::DlnaRenderer;
pub use errors::DeviceError;
pub use linkplay::SpeakerRenderer;
