//! GStreamer pipeline source for cameras and decoded streams.
//!
//! The pipeline description must end in an `appsink name=sink` delivering raw RGB or BGR video.
use anyhow::{anyhow, Context, Result};
use common::{ChannelOrder, Frame};
use gstreamer::prelude::*;
use gstreamer_video::VideoFormat;

use crate::backend::VideoStream;

pub struct PipelineStream {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    released: bool,
}

impl PipelineStream {
    /// Build the pipeline and set it to playing.
    pub fn launch(description: &str) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let pipeline = gstreamer::parse_launch(description)
            .context("build pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("pipeline description is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("sink")
            .context("appsink named `sink` missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("sink element is not an appsink"))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set pipeline to Playing")?;
        log::info!("Pipeline playing: {description}");

        Ok(Self {
            pipeline,
            appsink,
            released: false,
        })
    }
}

impl VideoStream for PipelineStream {
    fn read_frame(&mut self) -> Option<Frame> {
        if self.released {
            return None;
        }

        // Blocks until a sample arrives, fails on EOS or pipeline errors
        let sample = match self.appsink.pull_sample() {
            Ok(sample) => sample,
            Err(e) => {
                log::warn!("Pipeline delivered no sample: {e}");
                return None;
            }
        };

        match sample_to_frame(&sample) {
            Ok(frame) => Some(frame),
            Err(e) => {
                log::error!("Unusable pipeline sample: {e:#}");
                None
            }
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("Error stopping pipeline: {e}");
        }
    }
}

impl Drop for PipelineStream {
    fn drop(&mut self) {
        self.release();
    }
}

fn sample_to_frame(sample: &gstreamer::Sample) -> Result<Frame> {
    let buffer = sample.buffer().context("sample missing buffer")?;
    let caps = sample.caps().context("sample missing caps")?;
    let info = gstreamer_video::VideoInfo::from_caps(caps).context("parse caps as video info")?;

    let order = match info.format() {
        VideoFormat::Rgb => ChannelOrder::Rgb,
        VideoFormat::Bgr => ChannelOrder::Bgr,
        other => return Err(anyhow!("unsupported pixel format {other:?}")),
    };

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map sample buffer")?;
    let data = map.as_slice();

    let pixels = if stride == row_bytes {
        data.get(..row_bytes * height as usize)
            .context("sample buffer too short")?
            .to_vec()
    } else {
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            pixels.extend_from_slice(
                data.get(start..start + row_bytes)
                    .context("sample row is out of bounds")?,
            );
        }
        pixels
    };

    Frame::from_raw(width, height, order, pixels).context("sample size does not match caps")
}
