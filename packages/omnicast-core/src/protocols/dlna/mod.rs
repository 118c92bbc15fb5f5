//! DLNA/UPnP media control over the AVTransport service.
//!
//! `play_media` is two SOAP actions: `SetAVTransportURI` with DIDL-Lite
//! metadata, then `Play`. `Play` is only sent once the renderer has accepted
//! the URI.

mod didl;
pub mod soap;

use async_trait::async_trait;
use reqwest::Client;

use self::didl::format_didl_lite;
use self::soap::{SoapRequestBuilder, SoapResult};
use super::{MediaClient, MediaCommand, MediaRequest, PlayOutcome};
use crate::device::{CastProtocol, DeviceDescriptor};
use crate::error::ErrorCode;

pub use soap::SoapError;

/// AVTransport SOAP client.
pub struct DlnaClient {
    http: Client,
}

impl DlnaClient {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    async fn set_transport_uri(
        &self,
        device: &DeviceDescriptor,
        request: &MediaRequest,
    ) -> SoapResult<String> {
        SoapRequestBuilder::new(&self.http, device)
            .action("SetAVTransportURI")
            .instance_id()
            .arg("CurrentURI", request.url.as_str())
            .arg("CurrentURIMetaData", format_didl_lite(request))
            .send()
            .await
    }

    async fn transport_action(&self, device: &DeviceDescriptor, command: MediaCommand) -> bool {
        let builder = SoapRequestBuilder::new(&self.http, device).instance_id();
        let builder = match command {
            MediaCommand::Play | MediaCommand::Resume => builder.action("Play").arg("Speed", "1"),
            MediaCommand::Pause => builder.action("Pause"),
            MediaCommand::Stop => builder.action("Stop"),
        };
        report(device, command, builder.send().await)
    }
}

fn report(device: &DeviceDescriptor, command: MediaCommand, result: SoapResult<String>) -> bool {
    match result {
        Ok(_) => {
            log::info!("[DLNA] {} succeeded on {}", command.as_str(), device.name);
            true
        }
        Err(e) => {
            log::warn!(
                "[DLNA] {} failed on {} ({}:{}): {} [{}]",
                command.as_str(),
                device.name,
                device.host,
                device.port,
                e,
                e.code()
            );
            false
        }
    }
}

#[async_trait]
impl MediaClient for DlnaClient {
    fn protocol(&self) -> CastProtocol {
        CastProtocol::Dlna
    }

    /// Renderers stay selected after a failed play.
    async fn play_media(&self, device: &DeviceDescriptor, request: &MediaRequest) -> PlayOutcome {
        if let Err(e) = self.set_transport_uri(device, request).await {
            log::warn!(
                "[DLNA] SetAVTransportURI failed on {}, not sending Play: {} [{}]",
                device.name,
                e,
                e.code()
            );
            return PlayOutcome::Failed;
        }
        if self.transport_action(device, MediaCommand::Play).await {
            PlayOutcome::Started
        } else {
            PlayOutcome::Failed
        }
    }

    async fn pause(&self, device: &DeviceDescriptor) -> bool {
        self.transport_action(device, MediaCommand::Pause).await
    }

    async fn resume(&self, device: &DeviceDescriptor) -> bool {
        self.transport_action(device, MediaCommand::Resume).await
    }

    async fn stop(&self, device: &DeviceDescriptor) -> bool {
        self.transport_action(device, MediaCommand::Stop).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{dlna_device, TestReceiver};

    const FAULT_BODY: &str = r#"<?xml version="1.0"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode>s:Client</faultcode><faultstring>UPnPError</faultstring></s:Fault></s:Body></s:Envelope>"#;

    fn soap_action(request: &crate::test_fixtures::RecordedRequest) -> String {
        request.header("soapaction").unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn play_sets_uri_then_plays() {
        let receiver = TestReceiver::start(200).await;
        let device = dlna_device("Den", "127.0.0.1", receiver.port());
        let client = DlnaClient::new(Client::new());

        let request = MediaRequest::new("http://10.0.0.2/a.mp3", "Song", "Band");
        assert_eq!(client.play_media(&device, &request).await, PlayOutcome::Started);

        let requests = receiver.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.path_and_query() == "/AVTransport/control"));
        assert_eq!(
            soap_action(&requests[0]),
            "\"urn:schemas-upnp-org:service:AVTransport:1#SetAVTransportURI\""
        );
        assert_eq!(
            requests[0].header("content-type"),
            Some("text/xml; charset=\"utf-8\"")
        );
        assert!(requests[0]
            .body
            .contains("<CurrentURI>http://10.0.0.2/a.mp3</CurrentURI>"));
        assert!(requests[0].body.contains("&lt;DIDL-Lite"));
        assert_eq!(
            soap_action(&requests[1]),
            "\"urn:schemas-upnp-org:service:AVTransport:1#Play\""
        );
        assert!(requests[1].body.contains("<Speed>1</Speed>"));
    }

    #[tokio::test]
    async fn failed_set_uri_never_sends_play() {
        let receiver = TestReceiver::start_with(|request| {
            if request.header("soapaction").unwrap_or_default().contains("SetAVTransportURI") {
                (500, FAULT_BODY.to_string())
            } else {
                (200, String::new())
            }
        })
        .await;
        let device = dlna_device("Den", "127.0.0.1", receiver.port());
        let client = DlnaClient::new(Client::new());

        let request = MediaRequest::new("http://10.0.0.2/a.mp3", "Song", "Band");
        assert_eq!(client.play_media(&device, &request).await, PlayOutcome::Failed);

        let requests = receiver.requests();
        assert_eq!(requests.len(), 1);
        assert!(soap_action(&requests[0]).contains("SetAVTransportURI"));
    }

    #[tokio::test]
    async fn transport_actions_map_to_soap_actions() {
        let receiver = TestReceiver::start(200).await;
        let device = dlna_device("Den", "127.0.0.1", receiver.port());
        let client = DlnaClient::new(Client::new());

        assert!(client.pause(&device).await);
        assert!(client.resume(&device).await);
        assert!(client.stop(&device).await);

        let actions: Vec<String> = receiver.requests().iter().map(soap_action).collect();
        assert!(actions[0].ends_with("#Pause\""));
        assert!(actions[1].ends_with("#Play\""));
        assert!(actions[2].ends_with("#Stop\""));
    }

    #[tokio::test]
    async fn fault_with_success_status_is_false() {
        let receiver = TestReceiver::start_with(|_| (200, FAULT_BODY.to_string())).await;
        let device = dlna_device("Den", "127.0.0.1", receiver.port());
        let client = DlnaClient::new(Client::new());

        assert!(!client.stop(&device).await);
    }
}
