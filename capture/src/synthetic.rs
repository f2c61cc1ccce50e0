//! Synthetic test-pattern source for `stub://` URLs.
//!
//! `stub://` produces frames forever, `stub://<n>` stops after `n` frames. Handy to exercise the
//! whole pipeline on machines without a camera.
use anyhow::{Context, Result};
use common::Frame;
use image::{Rgb, RgbImage};

use crate::backend::VideoStream;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

pub struct SyntheticStream {
    remaining: Option<u64>,
    frame_count: u64,
    released: bool,
}

impl SyntheticStream {
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            remaining: limit,
            frame_count: 0,
            released: false,
        }
    }

    /// Parse a `stub://` URL.
    pub fn from_url(url: &str) -> Result<Self> {
        let spec = url.trim_start_matches("stub://").trim_end_matches('/');
        let limit = match spec {
            "" => None,
            count => Some(
                count
                    .parse()
                    .with_context(|| format!("invalid frame count in {url}"))?,
            ),
        };
        Ok(Self::new(limit))
    }

    fn render(&self) -> RgbImage {
        // Diagonal gradient sliding to the right by four pixels per frame
        let offset = (self.frame_count * 4) as u32;
        RgbImage::from_fn(WIDTH, HEIGHT, |x, y| {
            let r = ((x + offset) % 256) as u8;
            let g = (y % 256) as u8;
            let b = ((x + y + offset) % 256) as u8;
            Rgb([r, g, b])
        })
    }
}

impl VideoStream for SyntheticStream {
    fn read_frame(&mut self) -> Option<Frame> {
        if self.released {
            return None;
        }
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }

        let frame = Frame::from_rgb_image(self.render());
        self.frame_count += 1;
        Some(frame)
    }

    fn release(&mut self) {
        self.released = true;
    }
}
