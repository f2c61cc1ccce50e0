//! V4L2 webcam source.
//!
use anyhow::Result;
use common::Frame;
use image::ImageFormat;
use rscam::{Camera, Config};
use simple_error::simple_error;

use crate::backend::VideoStream;

const FORMAT: &str = "MJPG";

/// Webcam streaming MJPG frames at its highest resolution and frame rate.
pub struct WebcamStream {
    device: String,
    cam: Option<Camera>,
}

impl WebcamStream {
    /// Open and start a video device on a Linux machine.
    pub fn open(device: &str) -> Result<Self> {
        let mut cam = Camera::new(device)?;
        log_supported_formats(&cam, FORMAT);
        let format = FORMAT.as_bytes();

        let resolution = get_max_resolution(&cam, format)?;
        let interval = get_max_frame_rate(&cam, format, resolution)?;

        cam.start(&Config {
            interval,
            resolution,
            format,
            ..Default::default()
        })?;

        log::info!(
            "Using camera {} at {}x{}, interval {}/{}",
            device,
            resolution.0,
            resolution.1,
            interval.0,
            interval.1
        );

        Ok(Self {
            device: device.to_owned(),
            cam: Some(cam),
        })
    }
}

impl VideoStream for WebcamStream {
    fn read_frame(&mut self) -> Option<Frame> {
        let cam = self.cam.as_ref()?;
        let jpeg = match cam.capture() {
            Ok(jpeg) => jpeg,
            Err(e) => {
                log::error!("Error capturing frame from {}: {e}", self.device);
                return None;
            }
        };

        match image::load_from_memory_with_format(&jpeg[..], ImageFormat::Jpeg) {
            Ok(image) => Some(Frame::from_rgb_image(image.to_rgb8())),
            Err(e) => {
                log::error!("Unable to decode frame from {}: {e}", self.device);
                None
            }
        }
    }

    fn release(&mut self) {
        if let Some(mut cam) = self.cam.take() {
            if let Err(e) = cam.stop() {
                log::warn!("Error stopping camera {}: {e}", self.device);
            }
            log::info!("Released camera {}", self.device);
        }
    }
}

/// Get the maximum supported resolution for the given format.
fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32)> {
    let resolution_info = cam.resolutions(format)?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    let resolution = match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => resolutions
            .into_iter()
            // Highest resolution in terms of number of pixels
            .max_by_key(|(width, height)| width * height),
        rscam::ResolutionInfo::Stepwise { max, .. } => Some(max),
    };
    Ok(resolution.ok_or_else(|| simple_error!("No resolution found"))?)
}

/// Get the maximum supported frame rate for the given format and resolution.
///
/// Frame intervals are `(numerator, denominator)` in seconds, so the highest frame rate is the
/// interval with the largest `denominator / numerator`.
fn get_max_frame_rate(
    cam: &Camera,
    format: &[u8],
    resolution: (u32, u32),
) -> Result<(u32, u32)> {
    let interval_info = cam.intervals(format, resolution)?;
    log::debug!("Found frame rates: {:?}", &interval_info);
    let interval = match interval_info {
        rscam::IntervalInfo::Discretes(intervals) => intervals
            .into_iter()
            .max_by(|a, b| (a.1 as u64 * b.0 as u64).cmp(&(b.1 as u64 * a.0 as u64))),
        rscam::IntervalInfo::Stepwise { min, .. } => Some(min),
    };
    Ok(interval.ok_or_else(|| simple_error!("No frame rate found"))?)
}

fn log_supported_formats(cam: &Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}

impl Drop for WebcamStream {
    fn drop(&mut self) {
        self.release();
    }
}
