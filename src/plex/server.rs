use serde::Serialize;

use super::xml::{parse_document, Attrs, XmlHandler, CONTAINER};
use crate::error::Result;

/// Capabilities advertised on the server root (`GET /`).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerInfo {
    pub friendly_name: String,
    pub machine_identifier: String,
    pub version: String,
    pub platform: String,
    pub my_plex: bool,
    pub transcoder_video: bool,
}

#[derive(Default)]
struct RootHandler {
    info: Option<ServerInfo>,
}

impl XmlHandler for RootHandler {
    fn start(&mut self, name: &str, attrs: &Attrs, depth: usize) {
        if depth == 0 && name == CONTAINER {
            self.info = Some(ServerInfo {
                friendly_name: attrs.text("friendlyName"),
                machine_identifier: attrs.text("machineIdentifier"),
                version: attrs.text("version"),
                platform: attrs.text("platform"),
                my_plex: attrs.flag("myPlex"),
                transcoder_video: attrs.flag("transcoderVideo"),
            });
        }
    }

    fn end(&mut self, _name: &str, _depth: usize) {}
}

pub fn parse_server_info(bytes: &[u8]) -> Result<ServerInfo> {
    let mut handler = RootHandler::default();
    parse_document(bytes, &mut handler)?;
    Ok(handler.info.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_root_attributes() {
        let xml = br#"<MediaContainer size="25" friendlyName="basement" machineIdentifier="abc123" version="1.40.2.8395" platform="Linux" myPlex="1" transcoderVideo="1"><Directory key="activities" title="activities"/></MediaContainer>"#;
        let info = parse_server_info(xml).unwrap();
        assert_eq!(info.friendly_name, "basement");
        assert_eq!(info.machine_identifier, "abc123");
        assert_eq!(info.version, "1.40.2.8395");
        assert!(info.my_plex);
        assert!(info.transcoder_video);
    }

    #[test]
    fn missing_capabilities_default_to_empty() {
        let info = parse_server_info(br#"<MediaContainer size="0"/>"#).unwrap();
        assert_eq!(info, ServerInfo::default());
    }
}
