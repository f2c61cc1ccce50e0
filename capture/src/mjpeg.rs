//! MJPEG streams: concatenated JPEG images, optionally wrapped in multipart boundaries.
//!
//! Frames are cut out of the byte stream at their start-of-image (`FF D8`) marker and end after
//! the matching end-of-image (`FF D9`) marker, so both `multipart/x-mixed-replace` HTTP bodies and
//! raw `.mjpeg` files work. Marker segments are walked by their length fields, images embedded in
//! metadata (EXIF thumbnails) do not end the frame.
use std::io::Read;

use common::Frame;
use image::ImageFormat;

use crate::backend::VideoStream;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Upper bound for buffered bytes without a complete image.
const MAX_BUFFERED: usize = 16 * 1024 * 1024;

const READ_CHUNK: usize = 64 * 1024;

/// Extracts complete JPEG images from a byte stream.
#[derive(Debug, Default)]
pub struct JpegScanner {
    buf: Vec<u8>,
}

impl JpegScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        if self.buf.len() > MAX_BUFFERED {
            log::warn!("Dropping {} bytes without a complete JPEG image", self.buf.len());
            self.buf.clear();
        }
    }

    /// Take the next complete JPEG image, if one is buffered.
    pub fn next_jpeg(&mut self) -> Option<Vec<u8>> {
        let start = match find(&self.buf, &SOI, 0) {
            Some(start) => start,
            None => {
                // Keep a trailing 0xFF, it may be the first half of a marker
                let keep = usize::from(self.buf.last() == Some(&0xFF));
                self.buf.drain(..self.buf.len() - keep);
                return None;
            }
        };

        let end = image_end(&self.buf, start + SOI.len())?;
        let jpeg = self.buf[start..end].to_vec();
        self.buf.drain(..end);

        Some(jpeg)
    }
}

/// End of the image whose first segment starts at `pos`, `None` while it is incomplete.
fn image_end(buf: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        if *buf.get(pos)? != 0xFF {
            // Not at a segment boundary, fall back to the first end-of-image marker
            return find(buf, &EOI, pos).map(|end| end + EOI.len());
        }

        let marker = *buf.get(pos + 1)?;
        match marker {
            // Fill byte
            0xFF => pos += 1,
            0xD9 => return Some(pos + EOI.len()),
            // Markers without payload
            0x01 | 0xD0..=0xD7 => pos += 2,
            _ => {
                let length = u16::from_be_bytes([*buf.get(pos + 2)?, *buf.get(pos + 3)?]);
                pos += 2 + length as usize;
                // Start of scan is followed by entropy-coded data up to the next marker
                if marker == 0xDA {
                    pos = next_marker(buf, pos)?;
                }
            }
        }
    }
}

/// Position of the first marker in entropy-coded data starting at `pos`.
///
/// `FF 00` is an escaped data byte and restart markers belong to the scan.
fn next_marker(buf: &[u8], pos: usize) -> Option<usize> {
    buf.get(pos..)?
        .windows(2)
        .position(|w| w[0] == 0xFF && w[1] != 0x00 && !(0xD0..=0xD7).contains(&w[1]))
        .map(|offset| pos + offset)
}

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

/// Video stream decoding JPEG images from any reader.
pub struct MjpegStream<R: Read> {
    reader: Option<R>,
    scanner: JpegScanner,
    chunk: Vec<u8>,
}

impl<R: Read> MjpegStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
            scanner: JpegScanner::new(),
            chunk: vec![0; READ_CHUNK],
        }
    }
}

impl<R: Read> VideoStream for MjpegStream<R> {
    fn read_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(jpeg) = self.scanner.next_jpeg() {
                return match image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg) {
                    Ok(image) => Some(Frame::from_rgb_image(image.to_rgb8())),
                    Err(e) => {
                        log::warn!("Unable to decode JPEG frame: {e}");
                        None
                    }
                };
            }

            let reader = self.reader.as_mut()?;
            match reader.read(&mut self.chunk) {
                Ok(0) => {
                    log::info!("MJPEG stream ended");
                    return None;
                }
                Ok(n) => self.scanner.push(&self.chunk[..n]),
                Err(e) => {
                    log::warn!("Error reading MJPEG stream: {e}");
                    return None;
                }
            }
        }
    }

    fn release(&mut self) {
        self.reader = None;
    }
}
