//! Minimal UPnP SOAP client used by the DLNA adapter.

use std::time::Duration;

use ureq::Agent;
use xmltree::{Element, EmitterConfig, XMLNode};

use crate::errors::DeviceError;

pub const AVTRANSPORT_URN: &str = "urn:schemas-upnp-org:service:AVTransport:1";
pub const RENDERING_CONTROL_URN: &str = "urn:schemas-upnp-org:service:RenderingControl:1";

fn build_soap_envelope(body_child: Element) -> Result<String, DeviceError> {
    let mut body = Element::new("s:Body");
    body.children.push(XMLNode::Element(body_child));

    let mut envelope = Element::new("s:Envelope");
    envelope.attributes.insert(
        "xmlns:s".to_string(),
        "http://schemas.xmlsoap.org/soap/envelope/".to_string(),
    );
    envelope.attributes.insert(
        "s:encodingStyle".to_string(),
        "http://schemas.xmlsoap.org/soap/encoding/".to_string(),
    );
    envelope.children.push(XMLNode::Element(body));

    let mut buf = Vec::new();
    let config = EmitterConfig::new()
        .write_document_declaration(true)
        .perform_indent(false);
    envelope
        .write_with_config(&mut buf, config)
        .map_err(|e| DeviceError::Parsing(format!("cannot write SOAP envelope: {e}")))?;

    String::from_utf8(buf)
        .map_err(|e| DeviceError::Parsing(format!("SOAP envelope is not UTF-8: {e}")))
}

/// Builds the SOAP envelope for `action` on `service_urn`.
pub fn build_soap_request(
    service_urn: &str,
    action: &str,
    args: &[(&str, &str)],
) -> Result<String, DeviceError> {
    let mut request = Element::new(&format!("u:{action}"));
    request
        .attributes
        .insert("xmlns:u".to_string(), service_urn.to_string());

    for (name, value) in args {
        let mut child = Element::new(name);
        child.children.push(XMLNode::Text((*value).to_string()));
        request.children.push(XMLNode::Element(child));
    }

    build_soap_envelope(request)
}

/// Invokes a SOAP action and returns the `<ActionResponse>` element.
///
/// HTTP errors are not treated as transport failures so that the SOAP fault
/// body can be reported back to the caller.
pub fn invoke_upnp_action(
    control_url: &str,
    service_urn: &str,
    action: &str,
    args: &[(&str, &str)],
    timeout: Duration,
) -> Result<Element, DeviceError> {
    let body_xml = build_soap_request(service_urn, action, args)?;

    let agent: Agent = Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(Some(timeout))
        .build()
        .into();

    let soap_action_header = format!(r#""{}#{}""#, service_urn, action);

    let mut response = agent
        .post(control_url)
        .header("Content-Type", r#"text/xml; charset="utf-8""#)
        .header("SOAPAction", &soap_action_header)
        .send(body_xml)
        .map_err(|e| DeviceError::http(control_url, e))?;

    let status = response.status();
    let raw_body = response
        .body_mut()
        .read_to_string()
        .map_err(|e| DeviceError::http(control_url, e))?;

    if !status.is_success() {
        return Err(DeviceError::Soap(
            action.to_string(),
            status.as_u16(),
            fault_string(&raw_body).unwrap_or(raw_body),
        ));
    }

    parse_action_response(&raw_body, action)
}

/// Extracts `<{action}Response>` from a SOAP envelope.
pub fn parse_action_response(xml: &str, action: &str) -> Result<Element, DeviceError> {
    let root = Element::parse(xml.as_bytes())
        .map_err(|e| DeviceError::Parsing(format!("invalid SOAP envelope: {e}")))?;

    let body = find_child_with_suffix(&root, "Body")
        .ok_or_else(|| DeviceError::SoapMissingValue("Body".to_string()))?;

    let response_name = format!("{action}Response");
    find_child_with_suffix(body, &response_name)
        .cloned()
        .ok_or(DeviceError::SoapMissingValue(response_name))
}

fn fault_string(xml: &str) -> Option<String> {
    let root = Element::parse(xml.as_bytes()).ok()?;
    let body = find_child_with_suffix(&root, "Body")?;
    let fault = find_child_with_suffix(body, "Fault")?;
    child_text(fault, "faultstring")
}

pub fn find_child_with_suffix<'a>(parent: &'a Element, suffix: &str) -> Option<&'a Element> {
    parent.children.iter().find_map(|node| match node {
        XMLNode::Element(elem) if elem.name.ends_with(suffix) => Some(elem),
        _ => None,
    })
}

/// Text of the first child whose name ends with `suffix`, trimmed.
pub fn child_text(parent: &Element, suffix: &str) -> Option<String> {
    find_child_with_suffix(parent, suffix)
        .and_then(|child| child.get_text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_escapes_arguments() {
        let xml = build_soap_request(
            AVTRANSPORT_URN,
            "SetAVTransportURI",
            &[("InstanceID", "0"), ("CurrentURI", "http://h/a.mp3?x=1&y=2")],
        )
        .unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<u:SetAVTransportURI"));
        assert!(xml.contains(r#"xmlns:u="urn:schemas-upnp-org:service:AVTransport:1""#));
        assert!(xml.contains("<CurrentURI>http://h/a.mp3?x=1&amp;y=2</CurrentURI>"));
        assert!(xml.contains("<InstanceID>0</InstanceID>"));
    }

    #[test]
    fn built_request_reads_back_as_an_envelope() {
        let xml = build_soap_request(
            RENDERING_CONTROL_URN,
            "SetVolume",
            &[("InstanceID", "0"), ("Channel", "Master"), ("DesiredVolume", "30")],
        )
        .unwrap();
        let root = Element::parse(xml.as_bytes()).unwrap();
        let body = find_child_with_suffix(&root, "Body").unwrap();
        let action = find_child_with_suffix(body, "SetVolume").unwrap();
        assert_eq!(child_text(action, "DesiredVolume").as_deref(), Some("30"));
        assert_eq!(child_text(action, "Channel").as_deref(), Some("Master"));
    }

    #[test]
    fn response_element_is_found() {
        let xml = r#"<?xml version="1.0"?>
            <s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
              <s:Body>
                <u:GetTransportInfoResponse xmlns:u="urn:schemas-upnp-org:service:AVTransport:1">
                  <CurrentTransportState>PLAYING</CurrentTransportState>
                  <CurrentTransportStatus>OK</CurrentTransportStatus>
                </u:GetTransportInfoResponse>
              </s:Body>
            </s:Envelope>"#;

        let response = parse_action_response(xml, "GetTransportInfo").unwrap();
        assert_eq!(
            child_text(&response, "CurrentTransportState").as_deref(),
            Some("PLAYING")
        );
        assert!(parse_action_response(xml, "GetPositionInfo").is_err());
    }

    #[test]
    fn fault_string_is_extracted() {
        let xml = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
              <s:Body><s:Fault><faultcode>s:Client</faultcode>
              <faultstring>UPnPError</faultstring></s:Fault></s:Body></s:Envelope>"#;
        assert_eq!(fault_string(xml).as_deref(), Some("UPnPError"));
    }
}
