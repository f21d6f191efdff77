//! Media file descriptors shared by captures, clips and recordings.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

/// A file in the media directory together with the URL it is served under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFile {
    pub filename: String,
    pub url: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageFile {
    #[serde(flatten)]
    pub file: MediaFile,
    pub height: u32,
}

impl ImageFile {
    pub fn new(filename: &str, url: &str, height: u32) -> Self {
        ImageFile {
            file: MediaFile {
                filename: filename.to_string(),
                url: url.to_string(),
                media_type: MediaType::Image,
            },
            height,
        }
    }

    pub fn filename(&self) -> &str {
        &self.file.filename
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFile {
    #[serde(flatten)]
    pub file: MediaFile,
    pub duration_ms: u64,
}

impl VideoFile {
    pub fn new(filename: &str, url: &str, duration_ms: u64) -> Self {
        VideoFile {
            file: MediaFile {
                filename: filename.to_string(),
                url: url.to_string(),
                media_type: MediaType::Video,
            },
            duration_ms,
        }
    }

    pub fn filename(&self) -> &str {
        &self.file.filename
    }
}
