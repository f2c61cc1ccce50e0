//! Frame and inference-time accounting.
//!
//! The loop records every annotated frame twice: into a meter of its own, which ends up in the
//! run report, and into the process-wide `METER` drained by the logger task.
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

const LOG_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
pub struct Meter {
    frames: AtomicU64,
    inference_micros: AtomicU64,
}

/// Counts drained from a [`Meter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeterReading {
    pub frames: u64,
    pub inference: Duration,
}

impl MeterReading {
    pub fn mean_inference(&self) -> Option<Duration> {
        u32::try_from(self.frames)
            .ok()
            .filter(|frames| *frames > 0)
            .map(|frames| self.inference / frames)
    }

    pub fn frames_per_second(&self, elapsed: Duration) -> f32 {
        self.frames as f32 / elapsed.as_secs_f32().max(f32::EPSILON)
    }
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            frames: AtomicU64::new(0),
            inference_micros: AtomicU64::new(0),
        }
    }

    /// Account one annotated frame and the time its inference took.
    pub fn record_frame(&self, inference: Duration) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.inference_micros
            .fetch_add(inference.as_micros() as u64, Ordering::Relaxed);
    }

    /// Drain the counts recorded since the last call.
    pub fn take(&self) -> MeterReading {
        MeterReading {
            frames: self.frames.swap(0, Ordering::Relaxed),
            inference: Duration::from_micros(self.inference_micros.swap(0, Ordering::Relaxed)),
        }
    }
}

/// Log the detection rate and mean inference time while frames flow.
pub fn spawn_meter_logger() -> JoinHandle<()> {
    tokio::spawn(async {
        let mut log_interval = interval(LOG_INTERVAL);
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let reading = METER.take();
            if let Some(mean) = reading.mean_inference() {
                log::info!(
                    "Detecting at {:.2} frames per second, mean inference {:.1} ms",
                    reading.frames_per_second(start.elapsed()),
                    mean.as_secs_f32() * 1000.0
                );
            }
        }
    })
}
