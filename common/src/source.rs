//! Video source selection.
//!
use std::fmt;

use serde::{Deserialize, Serialize};

/// GStreamer pipeline for the Raspberry Pi camera (libcamera), delivering 640x480 BGR frames.
pub const PI_CAMERA_PIPELINE: &str = "libcamerasrc ! video/x-raw, width=640, height=480, \
    framerate=30/1 ! videoconvert ! videoscale ! video/x-raw, format=BGR ! appsink name=sink";

/// Where video frames come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    /// Local video device index.
    Device(u32),
    /// Stream URL or file path.
    Url(String),
    /// Camera pipeline description.
    Pipeline(String),
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceDescriptor::Device(index) => write!(f, "{index}"),
            SourceDescriptor::Url(url) => f.write_str(url),
            SourceDescriptor::Pipeline(pipeline) => f.write_str(pipeline),
        }
    }
}

/// Source types offered in the UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Webcam,
    NetworkStream,
    PiCamera,
}

/// Raw source choice as made in the UI, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SourceSelection {
    #[serde(rename = "source_kind", default)]
    pub kind: SourceKind,
    #[serde(default)]
    pub webcam_index: Option<i64>,
    #[serde(default)]
    pub stream_url: Option<String>,
}

/// The selected source cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidSource;

impl fmt::Display for InvalidSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Please provide a valid video source.")
    }
}

impl std::error::Error for InvalidSource {}

impl SourceSelection {
    pub fn webcam(index: i64) -> Self {
        Self {
            kind: SourceKind::Webcam,
            webcam_index: Some(index),
            stream_url: None,
        }
    }

    pub fn network_stream(url: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::NetworkStream,
            webcam_index: None,
            stream_url: Some(url.into()),
        }
    }

    pub fn pi_camera() -> Self {
        Self {
            kind: SourceKind::PiCamera,
            webcam_index: None,
            stream_url: None,
        }
    }

    /// Validate the choice and turn it into a descriptor for the capture step.
    ///
    /// Webcam indices default to 0 and must not be negative, stream URLs must not be blank. The
    /// camera pipeline is fixed.
    pub fn resolve(&self) -> Result<SourceDescriptor, InvalidSource> {
        match self.kind {
            SourceKind::Webcam => u32::try_from(self.webcam_index.unwrap_or(0))
                .map(SourceDescriptor::Device)
                .map_err(|_| InvalidSource),
            SourceKind::NetworkStream => match self.stream_url.as_deref().map(str::trim) {
                Some(url) if !url.is_empty() => Ok(SourceDescriptor::Url(url.to_owned())),
                _ => Err(InvalidSource),
            },
            SourceKind::PiCamera => Ok(SourceDescriptor::Pipeline(PI_CAMERA_PIPELINE.to_owned())),
        }
    }
}
