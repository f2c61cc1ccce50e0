//! In-memory capabilities for exercising the loop and session without devices or models.
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use anyhow::{bail, Result};
use capture::{Capture, VideoStream};
use common::{ChannelOrder, Frame, SourceDescriptor};
use image::RgbImage;

use crate::{
    detection::RunFlag,
    display::FrameSink,
    export::Exporter,
    model::{Detector, InferModel},
};

/// Capture delivering a fixed number of tiny frames per opened stream.
#[derive(Default)]
pub struct FakeCapture {
    frames: usize,
    unavailable: bool,
    order: ChannelOrder,
    stop_after: Option<(usize, RunFlag)>,
    pub opened: AtomicUsize,
    released: Arc<AtomicUsize>,
}

impl FakeCapture {
    pub fn with_frames(frames: usize) -> Self {
        Self {
            frames,
            ..Default::default()
        }
    }

    /// Capture whose sources never open.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Default::default()
        }
    }

    /// Clear `flag` while reading frame number `count`, like a Stop arriving mid-run.
    pub fn stopping_after(mut self, count: usize, flag: RunFlag) -> Self {
        self.stop_after = Some((count, flag));
        self
    }

    /// Deliver frames in BGR order.
    pub fn bgr(mut self) -> Self {
        self.order = ChannelOrder::Bgr;
        self
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl Capture for FakeCapture {
    fn open(&self, source: &SourceDescriptor) -> Result<Box<dyn VideoStream>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            bail!("no such device: {source}");
        }

        Ok(Box::new(FakeStream {
            remaining: self.frames,
            read: 0,
            order: self.order,
            stop_after: self.stop_after.clone(),
            released: self.released.clone(),
        }))
    }
}

struct FakeStream {
    remaining: usize,
    read: usize,
    order: ChannelOrder,
    stop_after: Option<(usize, RunFlag)>,
    released: Arc<AtomicUsize>,
}

impl VideoStream for FakeStream {
    fn read_frame(&mut self) -> Option<Frame> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.read += 1;

        if let Some((count, flag)) = &self.stop_after {
            if self.read == *count {
                flag.stop();
            }
        }

        // Every pixel reads as RGB (1, 2, 3) once the channel order is applied
        let pixel = match self.order {
            ChannelOrder::Rgb => [1, 2, 3],
            ChannelOrder::Bgr => [3, 2, 1],
        };
        Frame::from_raw(2, 2, self.order, pixel.repeat(4))
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Detector recording which model paths were loaded.
#[derive(Default)]
pub struct FakeDetector {
    fail_load: bool,
    fail_inference_after: Option<usize>,
    delay: Option<Duration>,
    panic: bool,
    loaded: Mutex<Vec<PathBuf>>,
    inferences: Arc<AtomicUsize>,
}

impl FakeDetector {
    /// Detector for which every load fails.
    pub fn failing() -> Self {
        Self {
            fail_load: true,
            ..Default::default()
        }
    }

    /// Detector whose models fail on inference once `count` frames were annotated.
    pub fn failing_inference_after(count: usize) -> Self {
        Self {
            fail_inference_after: Some(count),
            ..Default::default()
        }
    }

    /// Detector whose models take `delay` per frame.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    /// Detector whose models panic on the first frame.
    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Default::default()
        }
    }

    pub fn model(&self) -> Box<dyn InferModel> {
        Box::new(FakeModel {
            fail_after: self.fail_inference_after,
            delay: self.delay,
            panic: self.panic,
            inferences: self.inferences.clone(),
        })
    }

    pub fn loaded_paths(&self) -> Vec<PathBuf> {
        self.loaded.lock().unwrap().clone()
    }

    /// Frames annotated across all models of this detector.
    pub fn inferences(&self) -> usize {
        self.inferences.load(Ordering::SeqCst)
    }
}

impl Detector for FakeDetector {
    fn load(&self, path: &Path) -> Result<Box<dyn InferModel>> {
        if self.fail_load {
            bail!("no model at {}", path.display());
        }
        self.loaded.lock().unwrap().push(path.to_path_buf());
        Ok(self.model())
    }
}

struct FakeModel {
    fail_after: Option<usize>,
    delay: Option<Duration>,
    panic: bool,
    inferences: Arc<AtomicUsize>,
}

impl InferModel for FakeModel {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<crate::model::Detection>> {
        if let Some(limit) = self.fail_after {
            if self.inferences.load(Ordering::SeqCst) >= limit {
                bail!("tensor shape mismatch");
            }
        }
        Ok(Vec::new())
    }

    fn annotate(&mut self, frame: Frame) -> Result<Frame> {
        if self.panic {
            panic!("model blew up");
        }
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        self.detect(&frame)?;
        self.inferences.fetch_add(1, Ordering::SeqCst);
        Ok(frame)
    }
}

#[derive(Default)]
pub struct FakeExporter {
    fail: bool,
}

impl FakeExporter {
    pub fn failing() -> Self {
        Self { fail: true }
    }
}

impl Exporter for FakeExporter {
    fn export(&self, baseline: &Path, _output: &Path) -> Result<()> {
        if self.fail {
            bail!("unsupported operator in {}", baseline.display());
        }
        Ok(())
    }
}

/// Display keeping count of what it was asked to show.
#[derive(Default)]
pub struct RecordingSink {
    shown: AtomicUsize,
    cleared: AtomicUsize,
    last: Mutex<Option<RgbImage>>,
}

impl RecordingSink {
    pub fn shown(&self) -> usize {
        self.shown.load(Ordering::SeqCst)
    }

    pub fn cleared(&self) -> usize {
        self.cleared.load(Ordering::SeqCst)
    }

    /// Top-left pixel of the last shown frame.
    pub fn last_pixel(&self) -> Option<[u8; 3]> {
        self.last
            .lock()
            .unwrap()
            .as_ref()
            .map(|image| image.get_pixel(0, 0).0)
    }
}

impl FrameSink for RecordingSink {
    fn show(&self, frame: RgbImage) {
        self.shown.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(frame);
    }

    fn clear(&self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }
}
