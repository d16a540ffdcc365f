//! DLNA / UPnP AV renderer driven through AVTransport and RenderingControl.

use std::time::Duration;

use tracing::debug;

use crate::adapter::{DeviceAdapter, DeviceState, DeviceStatus};
use crate::errors::DeviceError;
use crate::soap::{AVTRANSPORT_URN, RENDERING_CONTROL_URN, child_text, invoke_upnp_action};
use crate::time_utils::parse_optional_time;

const INSTANCE_ID: &str = "0";

#[derive(Clone, Debug)]
pub struct DlnaRenderer {
    avtransport_url: String,
    rendering_control_url: Option<String>,
    timeout: Duration,
}

impl DlnaRenderer {
    /// `address` is the AVTransport control URL of the renderer.
    pub fn new(address: &str, timeout: Duration) -> Result<Self, DeviceError> {
        let address = address.trim();
        if !address.starts_with("http://") && !address.starts_with("https://") {
            return Err(DeviceError::MissingAddress(address.to_string()));
        }

        Ok(Self {
            avtransport_url: address.to_string(),
            rendering_control_url: rendering_control_url(address),
            timeout,
        })
    }

    fn avtransport(
        &self,
        action: &str,
        args: &[(&str, &str)],
    ) -> Result<xmltree::Element, DeviceError> {
        invoke_upnp_action(
            &self.avtransport_url,
            AVTRANSPORT_URN,
            action,
            args,
            self.timeout,
        )
    }
}

/// Renderers almost always expose RenderingControl next to AVTransport,
/// with the service name in the control path.
fn rendering_control_url(avtransport_url: &str) -> Option<String> {
    if avtransport_url.contains("AVTransport") {
        Some(avtransport_url.replacen("AVTransport", "RenderingControl", 1))
    } else {
        None
    }
}

impl DeviceAdapter for DlnaRenderer {
    fn play(&self, uri: &str) -> Result<(), DeviceError> {
        debug!(renderer = %self.avtransport_url, uri, "SetAVTransportURI");
        self.avtransport(
            "SetAVTransportURI",
            &[
                ("InstanceID", INSTANCE_ID),
                ("CurrentURI", uri),
                ("CurrentURIMetaData", ""),
            ],
        )?;
        self.avtransport("Play", &[("InstanceID", INSTANCE_ID), ("Speed", "1")])?;
        Ok(())
    }

    fn stop(&self) -> Result<(), DeviceError> {
        self.avtransport("Stop", &[("InstanceID", INSTANCE_ID)])?;
        Ok(())
    }

    fn get_status(&self) -> Result<DeviceStatus, DeviceError> {
        let transport = self.avtransport("GetTransportInfo", &[("InstanceID", INSTANCE_ID)])?;
        let state = child_text(&transport, "CurrentTransportState")
            .map(|raw| DeviceState::from_raw(&raw))
            .ok_or_else(|| DeviceError::SoapMissingValue("CurrentTransportState".into()))?;

        let position = self.avtransport("GetPositionInfo", &[("InstanceID", INSTANCE_ID)])?;
        let duration = child_text(&position, "TrackDuration").and_then(|t| parse_optional_time(&t));
        let rel_time = child_text(&position, "RelTime").and_then(|t| parse_optional_time(&t));

        Ok(DeviceStatus {
            state,
            duration,
            position: rel_time,
        })
    }

    fn set_volume(&self, volume: u8) -> Result<(), DeviceError> {
        let url = self
            .rendering_control_url
            .as_deref()
            .ok_or_else(|| DeviceError::not_supported("set_volume", "dlna"))?;
        let desired = volume.min(100).to_string();
        invoke_upnp_action(
            url,
            RENDERING_CONTROL_URN,
            "SetVolume",
            &[
                ("InstanceID", INSTANCE_ID),
                ("Channel", "Master"),
                ("DesiredVolume", &desired),
            ],
            self.timeout,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendering_control_is_derived_from_avtransport_path() {
        assert_eq!(
            rendering_control_url("http://10.0.0.5:49152/upnp/control/AVTransport1").as_deref(),
            Some("http://10.0.0.5:49152/upnp/control/RenderingControl1")
        );
        assert_eq!(rendering_control_url("http://10.0.0.5/ctl/avt"), None);
    }

    #[test]
    fn address_must_be_an_http_url() {
        assert!(DlnaRenderer::new("10.0.0.5", Duration::from_secs(1)).is_err());
        assert!(DlnaRenderer::new("http://10.0.0.5/AVTransport/ctl", Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn volume_without_rendering_control_is_unsupported() {
        let renderer = DlnaRenderer::new("http://10.0.0.5/ctl/avt", Duration::from_secs(1)).unwrap();
        assert_eq!(
            renderer.set_volume(30),
            Err(DeviceError::not_supported("set_volume", "dlna"))
        );
    }
}
