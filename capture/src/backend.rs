//! Capture capability used by the detection loop.
//!
use std::{fs::File, path::Path};

use anyhow::{Context, Result};
use common::{Frame, SourceDescriptor};
use reqwest::header::CONTENT_TYPE;

use crate::{mjpeg::MjpegStream, synthetic::SyntheticStream};

/// File extensions read as concatenated JPEG images without a decoder pipeline.
const JPEG_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "mjpg", "mjpeg"];

/// An opened video source.
pub trait VideoStream {
    /// Read the next frame. `None` when the source is exhausted or the frame cannot be read.
    fn read_frame(&mut self) -> Option<Frame>;

    /// Release the device or connection behind the stream.
    fn release(&mut self);
}

/// Opens video sources.
pub trait Capture: Send + Sync {
    fn open(&self, source: &SourceDescriptor) -> Result<Box<dyn VideoStream>>;
}

/// Capture backed by the devices, streams and pipelines available on this machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCapture;

impl Capture for SystemCapture {
    fn open(&self, source: &SourceDescriptor) -> Result<Box<dyn VideoStream>> {
        match source {
            SourceDescriptor::Device(index) => open_device(*index),
            SourceDescriptor::Url(url) => open_url(url),
            SourceDescriptor::Pipeline(pipeline) => open_pipeline(pipeline),
        }
    }
}

/// GStreamer pipeline decoding any stream URL or video file into RGB frames.
///
/// Live URLs keep only the newest decoded frame, files are read frame by frame as fast as they
/// are consumed.
pub fn decode_pipeline(url: &str) -> String {
    let quoted = url.replace('"', "\\\"");
    match url.contains("://") {
        true => format!(
            "uridecodebin uri=\"{quoted}\" ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=sink sync=false max-buffers=1 drop=true"
        ),
        false => format!(
            "filesrc location=\"{quoted}\" ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=sink sync=false"
        ),
    }
}

#[cfg(feature = "webcam")]
fn open_device(index: u32) -> Result<Box<dyn VideoStream>> {
    let device = format!("/dev/video{index}");
    let stream = crate::webcam::WebcamStream::open(&device)
        .with_context(|| format!("failed to open {device}"))?;
    Ok(Box::new(stream))
}

#[cfg(not(feature = "webcam"))]
fn open_device(index: u32) -> Result<Box<dyn VideoStream>> {
    anyhow::bail!("webcam {index} requires the `webcam` feature")
}

#[cfg(feature = "pipeline")]
fn open_pipeline(pipeline: &str) -> Result<Box<dyn VideoStream>> {
    Ok(Box::new(crate::pipeline::PipelineStream::launch(pipeline)?))
}

#[cfg(not(feature = "pipeline"))]
fn open_pipeline(_pipeline: &str) -> Result<Box<dyn VideoStream>> {
    anyhow::bail!("GStreamer pipelines require the `pipeline` feature")
}

fn open_decoded(url: &str) -> Result<Box<dyn VideoStream>> {
    log::info!("Decoding {url} with GStreamer");
    open_pipeline(&decode_pipeline(url)).with_context(|| format!("failed to open {url}"))
}

fn open_url(url: &str) -> Result<Box<dyn VideoStream>> {
    if url.starts_with("stub://") {
        return Ok(Box::new(SyntheticStream::from_url(url)?));
    }

    if url.starts_with("http://") || url.starts_with("https://") {
        return open_http(url);
    }

    // RTSP and every other scheme go through the decoder
    if url.contains("://") {
        return open_decoded(url);
    }

    if !is_jpeg_file(url) {
        return open_decoded(url);
    }
    let file = File::open(url).with_context(|| format!("failed to open {url}"))?;
    log::info!("Reading frames from file {url}");
    Ok(Box::new(MjpegStream::new(file)))
}

/// HTTP sources serving JPEG images are read directly, other video formats are decoded.
fn open_http(url: &str) -> Result<Box<dyn VideoStream>> {
    let response = reqwest::blocking::get(url)
        .and_then(|response| response.error_for_status())
        .with_context(|| format!("failed to connect to {url}"))?;

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if is_jpeg_content(&content_type) {
        log::info!("Connected to stream {url} ({content_type})");
        return Ok(Box::new(MjpegStream::new(response)));
    }

    drop(response);
    open_decoded(url)
}

/// Whether an HTTP body of this content type is a JPEG image or an MJPEG stream.
fn is_jpeg_content(content_type: &str) -> bool {
    content_type.is_empty()
        || content_type.starts_with("image/jpeg")
        || content_type.starts_with("multipart/x-mixed-replace")
}

fn is_jpeg_file(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| JPEG_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
