//! Display of annotated frames in the browser.
//!
//! Frames are JPEG-encoded once and broadcast as parts of a `multipart/x-mixed-replace` stream to
//! every connected page.
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use bytes::Bytes;
use image::{codecs::jpeg::JpegEncoder, ColorType, Rgb, RgbImage};
use lazy_static::lazy_static;
use tokio::sync::broadcast;

pub type BroadcastSender = broadcast::Sender<Bytes>;
pub type BroadcastReceiver = broadcast::Receiver<Bytes>;

/// Boundary separating the parts of the display stream.
pub const BOUNDARY: &str = "frame";

const CHANNEL_CAPACITY: usize = 4;

lazy_static! {
    /// Placeholder shown while no detection runs.
    static ref BLANK_FRAME: RgbImage = RgbImage::from_pixel(640, 480, Rgb([32, 32, 32]));
}

/// Display region receiving annotated frames from the detection loop.
pub trait FrameSink: Send + Sync {
    /// Show an RGB frame.
    fn show(&self, frame: RgbImage);

    /// Empty the display region.
    fn clear(&self);
}

/// Broadcasts displayed frames to all connected browser streams.
pub struct DisplayHub {
    tx: BroadcastSender,
    jpeg_quality: u8,
    showing: AtomicBool,
}

impl DisplayHub {
    pub fn new(jpeg_quality: u8) -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            jpeg_quality,
            showing: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> BroadcastReceiver {
        self.tx.subscribe()
    }

    /// Whether the display currently shows frames of a run.
    pub fn is_showing(&self) -> bool {
        self.showing.load(Ordering::Relaxed)
    }

    /// Stream item with the placeholder frame.
    pub fn blank_item(&self) -> Result<Bytes> {
        Ok(as_jpeg_stream_item(&encode_jpeg(&BLANK_FRAME, self.jpeg_quality)?))
    }

    fn publish(&self, item: Bytes) {
        // No subscribers is fine, nobody is watching
        self.tx.send(item).ok();
    }
}

impl FrameSink for DisplayHub {
    fn show(&self, frame: RgbImage) {
        self.showing.store(true, Ordering::Relaxed);
        match encode_jpeg(&frame, self.jpeg_quality) {
            Ok(jpeg) => self.publish(as_jpeg_stream_item(&jpeg)),
            Err(e) => log::warn!("Unable to encode frame: {e:#}"),
        }
    }

    fn clear(&self) {
        self.showing.store(false, Ordering::Relaxed);
        match self.blank_item() {
            Ok(item) => self.publish(item),
            Err(e) => log::warn!("Unable to encode placeholder frame: {e:#}"),
        }
    }
}

fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let (width, height) = frame.dimensions();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode(frame, width, height, ColorType::Rgb8)?;
    Ok(buf)
}

/// Wrap a JPEG image as one part of the multipart display stream.
pub fn as_jpeg_stream_item(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(
        &[
            format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n").as_bytes(),
            data,
            "\r\n\r\n".as_bytes(),
        ]
        .concat(),
    )
}
