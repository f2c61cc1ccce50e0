//! Video capture backends for the detection loop.
//!
//! `SystemCapture` picks a backend per source descriptor: V4L2 webcams (feature `webcam`, on by
//! default), MJPEG over HTTP or from files, GStreamer decoding of other streams, video files and
//! camera pipelines (feature `pipeline`) and a synthetic `stub://` source.
pub mod backend;
pub mod mjpeg;
#[cfg(feature = "pipeline")]
pub mod pipeline;
pub mod synthetic;
#[cfg(feature = "webcam")]
pub mod webcam;

pub use backend::{decode_pipeline, Capture, SystemCapture, VideoStream};
