//! Newline-delimited JSON messages accepted by `imgrab --listen`.

use serde::{Deserialize, Serialize};

use crate::autosave::CycleOutcome;
use crate::config::BatchOptions;
use crate::orchestrator::BatchReport;
use crate::scanner::PageImages;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
    /// Manual download of an explicit list.
    #[serde(rename_all = "camelCase")]
    DownloadImages {
        images_to_download: Vec<String>,
        #[serde(default)]
        options: BatchOptions,
    },
    /// Page images reported by a scanner, for auto-save.
    #[serde(rename_all = "camelCase")]
    SendImages {
        #[serde(default)]
        all_images: Vec<String>,
        #[serde(default)]
        linked_images: Vec<String>,
    },
    /// The page images now come from; becomes the Referer of later requests.
    SetActiveTabOrigin { origin: String },
}

impl Message {
    pub fn parse(line: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

impl From<(Vec<String>, Vec<String>)> for PageImages {
    fn from((all_images, linked_images): (Vec<String>, Vec<String>)) -> Self {
        Self {
            all_images,
            linked_images,
        }
    }
}

/// One line written back on stdout per handled message.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Reply {
    BatchDone { report: BatchReport },
    AutoSave { result: CycleOutcome },
    RefererSet { referer: String },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_download_images() {
        let line = r#"{"type":"downloadImages","imagesToDownload":["https://x/a.jpg"],"options":{"folder_name":"f","new_file_name":"n"}}"#;
        assert_eq!(
            Message::parse(line).unwrap(),
            Message::DownloadImages {
                images_to_download: vec!["https://x/a.jpg".into()],
                options: BatchOptions {
                    folder_name: "f".into(),
                    new_file_name: "n".into(),
                },
            }
        );
    }

    #[test]
    fn options_default_when_missing() {
        let line = r#"{"type":"downloadImages","imagesToDownload":[],"options":{}}"#;
        let Message::DownloadImages { options, .. } = Message::parse(line).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(options, BatchOptions::default());
    }

    #[test]
    fn parses_send_images() {
        let line = r#"{"type":"sendImages","allImages":["a","b"],"linkedImages":["b"]}"#;
        let Message::SendImages {
            all_images,
            linked_images,
        } = Message::parse(line).unwrap()
        else {
            panic!("wrong variant");
        };
        let images = PageImages::from((all_images, linked_images));
        assert_eq!(images.candidates(true), ["b"]);
    }

    #[test]
    fn parses_active_tab_origin() {
        let line = r#"{"type":"setActiveTabOrigin","origin":"https://gallery.example"}"#;
        assert_eq!(
            Message::parse(line).unwrap(),
            Message::SetActiveTabOrigin {
                origin: "https://gallery.example".into(),
            }
        );
        assert!(Message::parse(r#"{"type":"setActiveTabOrigin"}"#).is_err());
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(Message::parse(r#"{"type":"openPopup"}"#).is_err());
        assert!(Message::parse("not json").is_err());
    }

    #[test]
    fn reply_wire_shape() {
        let reply = Reply::Error {
            message: "busy".into(),
        };
        assert_eq!(
            serde_json::to_string(&reply).unwrap(),
            r#"{"type":"error","message":"busy"}"#
        );
    }
}
