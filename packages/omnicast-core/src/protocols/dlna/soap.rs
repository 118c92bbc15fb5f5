//! Low-level SOAP transport for UPnP AVTransport control.
//!
//! Builds the envelope, posts it, and turns fault responses into errors.
//! High-level media commands live in the parent module.

use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use thiserror::Error;

use crate::device::DeviceDescriptor;
use crate::protocol_constants::{AV_TRANSPORT_CONTROL_PATH, AV_TRANSPORT_URN};

/// Errors that can occur during a SOAP exchange with a renderer.
#[derive(Debug, Error)]
pub enum SoapError {
    /// HTTP request to the renderer failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Renderer returned a non-success HTTP status without a SOAP fault.
    #[error("HTTP error {0}: {1}")]
    HttpStatus(u16, String),

    /// Renderer returned a SOAP fault response.
    #[error("SOAP fault: {0}")]
    Fault(String),

    /// Request could not be assembled.
    #[error("Invalid SOAP request: {0}")]
    Invalid(&'static str),
}

/// Convenient Result alias for SOAP operations.
pub type SoapResult<T> = Result<T, SoapError>;

/// Escapes `& < > " '` for element text and attribute values.
pub fn escape_xml(value: &str) -> String {
    html_escape::encode_quoted_attribute(value).into_owned()
}

/// Returns the decoded text content of the first `<tag>` element.
///
/// Namespace prefixes are ignored, so `faultstring` matches
/// `<s:faultstring>` as well.
pub fn extract_xml_text(xml: &str, tag: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut inside = false;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == tag.as_bytes() => {
                inside = true;
            }
            Ok(Event::End(ref e)) if inside && e.local_name().as_ref() == tag.as_bytes() => {
                return Some(text.trim().to_string());
            }
            Ok(Event::Text(ref e)) if inside => {
                text.push_str(&e.decode().ok()?);
            }
            Ok(Event::CData(ref e)) if inside => {
                text.push_str(&e.decode().ok()?);
            }
            Ok(Event::GeneralRef(ref e)) if inside => {
                let name = e.decode().ok()?;
                text.push_str(&html_escape::decode_html_entities(&format!("&{name};")));
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

/// Builds the single-line SOAP envelope for `action` with ordered `args`.
///
/// Some renderers reject envelopes with whitespace before the root element,
/// so nothing is pretty-printed.
pub fn build_envelope(service: &str, action: &str, args: &[(&str, &str)]) -> String {
    let mut body = format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/"><s:Body><u:{} xmlns:u="{}">"#,
        action, service
    );

    for (k, v) in args {
        body.push_str(&format!("<{k}>{}</{k}>", escape_xml(v)));
    }

    body.push_str(&format!(r#"</u:{}></s:Body></s:Envelope>"#, action));
    body
}

/// Sends one AVTransport SOAP action to `device`. Never retries.
///
/// # Returns
/// The response body on success, or a `SoapError` if the request fails
/// or the renderer returns a SOAP fault.
pub async fn send_soap_request(
    client: &Client,
    device: &DeviceDescriptor,
    action: &str,
    args: &[(&str, &str)],
) -> SoapResult<String> {
    let url = device.url(AV_TRANSPORT_CONTROL_PATH);
    let body = build_envelope(AV_TRANSPORT_URN, action, args);

    log::debug!("[SOAP] {} -> {} (body: {} bytes)", action, url, body.len());

    let start = std::time::Instant::now();
    let res = client
        .post(&url)
        .header("Content-Type", "text/xml; charset=\"utf-8\"")
        .header("SOAPAction", format!("\"{}#{}\"", AV_TRANSPORT_URN, action))
        .body(body)
        .send()
        .await;

    log::debug!(
        "[SOAP] {} completed in {:?}: {:?}",
        action,
        start.elapsed(),
        res.as_ref().map(|r| r.status())
    );

    let res = res?;
    let status = res.status();
    let response_text = res.text().await?;

    // Faults usually arrive with a 500 status; check them first.
    if let Some(fault) = extract_fault(&response_text) {
        return Err(SoapError::Fault(fault));
    }

    if !status.is_success() {
        return Err(SoapError::HttpStatus(status.as_u16(), response_text));
    }

    Ok(response_text)
}

fn extract_fault(xml: &str) -> Option<String> {
    if !xml.contains(":Fault>") && !xml.contains("<Fault>") {
        return None;
    }
    Some(extract_xml_text(xml, "faultstring").unwrap_or_else(|| "Unknown SOAP fault".to_string()))
}

/// Builder for AVTransport SOAP requests.
///
/// ```ignore
/// SoapRequestBuilder::new(&client, &device)
///     .action("Play")
///     .instance_id()
///     .arg("Speed", "1")
///     .send()
///     .await?;
/// ```
pub struct SoapRequestBuilder<'a> {
    client: &'a Client,
    device: &'a DeviceDescriptor,
    action: Option<&'a str>,
    args: Vec<(&'a str, String)>,
}

impl<'a> SoapRequestBuilder<'a> {
    #[must_use]
    pub fn new(client: &'a Client, device: &'a DeviceDescriptor) -> Self {
        Self {
            client,
            device,
            action: None,
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn action(mut self, action: &'a str) -> Self {
        self.action = Some(action);
        self
    }

    /// Adds an argument. Arguments keep insertion order in the body.
    #[must_use]
    pub fn arg(mut self, key: &'a str, value: impl Into<String>) -> Self {
        self.args.push((key, value.into()));
        self
    }

    /// Adds the `InstanceID=0` argument every AVTransport action takes.
    #[must_use]
    pub fn instance_id(self) -> Self {
        self.arg("InstanceID", "0")
    }

    /// Sends the request and returns the response body.
    ///
    /// # Errors
    /// Returns `SoapError` if the action is not set or the exchange fails.
    pub async fn send(self) -> SoapResult<String> {
        let action = self.action.ok_or(SoapError::Invalid("action not set"))?;
        let args: Vec<(&str, &str)> = self.args.iter().map(|(k, v)| (*k, v.as_str())).collect();
        send_soap_request(self.client, self.device, action, &args).await
    }

    #[cfg(test)]
    pub fn into_parts(self) -> Option<(&'a str, Vec<(&'a str, String)>)> {
        Some((self.action?, self.args))
    }
}
