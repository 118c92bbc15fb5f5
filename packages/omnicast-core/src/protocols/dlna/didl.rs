//! DIDL-Lite metadata sent with `SetAVTransportURI`.

use super::soap::escape_xml;
use crate::protocol_constants::DIDL_MUSIC_TRACK_CLASS;
use crate::protocols::MediaRequest;

/// Formats the DIDL-Lite document describing `request` as a music track.
///
/// Every value is XML-escaped; the caller escapes the whole document again
/// when it becomes a SOAP argument.
pub(crate) fn format_didl_lite(request: &MediaRequest) -> String {
    let mut didl = String::from(
        r#"<DIDL-Lite xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/" xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/">"#,
    );
    didl.push_str(r#"<item id="1" parentID="0" restricted="1">"#);
    didl.push_str(&format!(
        "<dc:title>{}</dc:title>",
        escape_xml(&request.title)
    ));
    didl.push_str(&format!(
        "<dc:creator>{}</dc:creator>",
        escape_xml(&request.artist)
    ));

    if let Some(art) = request.album_art.as_deref().filter(|a| !a.is_empty()) {
        didl.push_str(&format!(
            "<upnp:albumArtURI>{}</upnp:albumArtURI>",
            escape_xml(art)
        ));
    }

    didl.push_str(&format!("<upnp:class>{}</upnp:class>", DIDL_MUSIC_TRACK_CLASS));
    didl.push_str(&format!(
        r#"<res protocolInfo="http-get:*:{}:*">{}</res>"#,
        escape_xml(&request.mime_type),
        escape_xml(&request.url)
    ));
    didl.push_str("</item>");
    didl.push_str("</DIDL-Lite>");

    didl
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_music_track_item() {
        let request = MediaRequest::new("http://10.0.0.2/a.mp3", "Song", "Band");
        let didl = format_didl_lite(&request);

        assert!(didl.contains(r#"<item id="1" parentID="0" restricted="1">"#));
        assert!(didl.contains("<dc:title>Song</dc:title>"));
        assert!(didl.contains("<dc:creator>Band</dc:creator>"));
        assert!(didl.contains("<upnp:class>object.item.audioItem.musicTrack</upnp:class>"));
        assert!(didl.contains(
            r#"<res protocolInfo="http-get:*:audio/mpeg:*">http://10.0.0.2/a.mp3</res>"#
        ));
        assert!(!didl.contains("albumArtURI"));
    }

    #[test]
    fn escapes_values_and_includes_art() {
        let request = MediaRequest::new("http://x/a.mp3?a=1&b=2", "Rock & Roll", "<Band>")
            .with_album_art("http://x/art.jpg");
        let didl = format_didl_lite(&request);

        assert!(didl.contains("<dc:title>Rock &amp; Roll</dc:title>"));
        assert!(didl.contains("<dc:creator>&lt;Band&gt;</dc:creator>"));
        assert!(didl.contains("<upnp:albumArtURI>http://x/art.jpg</upnp:albumArtURI>"));
        assert!(didl.contains(">http://x/a.mp3?a=1&amp;b=2</res>"));
    }
}
