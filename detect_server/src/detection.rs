//! The capture/inference loop.
//!
//! The loop has two states. It leaves `Idle` when a run starts and the source opens, and returns
//! to it when the running flag is cleared, the source stops delivering frames, or inference fails.
//! The flag is polled once per iteration, a frame in flight is always finished.
//!
//! A cleared flag does not free the source immediately. Until the loop reaches its next iteration
//! boundary and releases the source the run is `Stopping`, and no new run may start.
use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use capture::Capture;
use common::{Notice, SourceDescriptor};

use crate::{
    display::FrameSink,
    meter::{Meter, METER},
    model::InferModel,
};

pub const READ_FAILURE: &str = "Failed to read frame from source. Stream may have ended.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    /// Stop was requested, the loop has not released its source yet.
    Stopping,
}

/// Why a start was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRefused {
    AlreadyRunning,
    /// The previous run did not release its source in time.
    StillStopping,
}

#[derive(Debug, Default)]
struct FlagState {
    /// Set by Start, cleared by Stop and when a run ends.
    running: bool,
    /// A run holds the source, from a successful start until its loop released it.
    active: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<FlagState>,
    released: Condvar,
}

/// Flag controlling whether the loop continues.
///
/// Clones share the same flag. It is set by the Start command and cleared by Stop, by failed
/// start-up and by the loop itself when a run ends. At most one [`RunGuard`] exists at a time.
#[derive(Debug, Clone, Default)]
pub struct RunFlag(Arc<Shared>);

impl RunFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the run, waiting up to `grace` for a stopping run to release its source.
    pub fn try_start(&self, grace: Duration) -> Result<RunGuard, StartRefused> {
        let state = self.lock();
        if state.running {
            return Err(StartRefused::AlreadyRunning);
        }

        let (mut state, _) = self
            .0
            .released
            .wait_timeout_while(state, grace, |state| state.active && !state.running)
            .unwrap_or_else(PoisonError::into_inner);
        if state.running {
            return Err(StartRefused::AlreadyRunning);
        }
        if state.active {
            return Err(StartRefused::StillStopping);
        }

        state.running = true;
        state.active = true;
        Ok(RunGuard { flag: self.clone() })
    }

    pub fn stop(&self) {
        self.lock().running = false;
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn state(&self) -> RunState {
        let state = self.lock();
        match (state.running, state.active) {
            (true, _) => RunState::Running,
            (false, true) => RunState::Stopping,
            (false, false) => RunState::Idle,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FlagState> {
        self.0.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive right to run the loop. Dropping it ends the run and lets the next one start.
#[derive(Debug)]
pub struct RunGuard {
    flag: RunFlag,
}

impl RunGuard {
    pub fn is_running(&self) -> bool {
        self.flag.is_running()
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        {
            let mut state = self.flag.lock();
            state.running = false;
            state.active = false;
        }
        self.flag.0.released.notify_all();
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    Stopped,
    StreamEnded,
    OpenFailed,
    InferenceFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Frames annotated and displayed.
    pub frames: u64,
    pub end: RunEnd,
    /// Message for the user, if the run ended abnormally.
    pub notice: Option<Notice>,
    /// Mean inference time over the annotated frames.
    pub mean_inference: Option<Duration>,
}

/// Run detection on `source` until stopped or the source is exhausted.
///
/// Blocks the calling thread. The run ends when `run` is dropped on return. If the source opened,
/// it is released and the display is cleared before that, on every exit path.
pub fn run_detection(
    capture: &dyn Capture,
    source: &SourceDescriptor,
    model: &mut dyn InferModel,
    display: &dyn FrameSink,
    run: RunGuard,
) -> RunReport {
    let mut stream = match capture.open(source) {
        Ok(stream) => stream,
        Err(e) => {
            log::error!("Error opening video source {source}: {e:#}");
            drop(run);
            return RunReport {
                frames: 0,
                end: RunEnd::OpenFailed,
                notice: Some(Notice::error(format!(
                    "Error opening video source: {source}"
                ))),
                mean_inference: None,
            };
        }
    };
    log::info!("Opened video source {source}");

    let run_meter = Meter::new();
    let (end, notice) = loop {
        if !run.is_running() {
            break (RunEnd::Stopped, None);
        }

        let frame = match stream.read_frame() {
            Some(frame) => frame,
            None => break (RunEnd::StreamEnded, Some(Notice::warning(READ_FAILURE))),
        };

        let started = Instant::now();
        match model.annotate(frame) {
            Ok(annotated) => {
                let inference = started.elapsed();
                METER.record_frame(inference);
                run_meter.record_frame(inference);
                display.show(annotated.into_rgb());
            }
            Err(e) => {
                log::error!("Inference failed: {e:#}");
                break (
                    RunEnd::InferenceFailed,
                    Some(Notice::error(format!("Inference failed: {e:#}"))),
                );
            }
        }
    };

    stream.release();
    display.clear();
    drop(run);

    let reading = run_meter.take();
    log::info!(
        "Detection on {source} ended after {} frames ({end:?}), mean inference {:?}",
        reading.frames,
        reading.mean_inference()
    );

    RunReport {
        frames: reading.frames,
        end,
        notice,
        mean_inference: reading.mean_inference(),
    }
}

#[cfg(test)]
mod test {

    use std::{sync::atomic::Ordering, thread};

    use common::Level;

    use super::*;
    use crate::fakes::{FakeCapture, FakeDetector, RecordingSink};

    fn started() -> (RunFlag, RunGuard) {
        let flag = RunFlag::new();
        let run = flag.try_start(Duration::ZERO).unwrap();
        (flag, run)
    }

    #[test]
    fn flag_refuses_double_start() {
        let flag = RunFlag::new();
        assert_eq!(flag.state(), RunState::Idle);

        let run = flag.try_start(Duration::ZERO).unwrap();
        assert_eq!(
            flag.try_start(Duration::ZERO).err(),
            Some(StartRefused::AlreadyRunning)
        );
        assert_eq!(flag.state(), RunState::Running);

        flag.clone().stop();
        assert_eq!(flag.state(), RunState::Stopping);
        assert_eq!(
            flag.try_start(Duration::from_millis(10)).err(),
            Some(StartRefused::StillStopping)
        );

        drop(run);
        assert_eq!(flag.state(), RunState::Idle);
        assert!(flag.try_start(Duration::ZERO).is_ok());
    }

    #[test]
    fn start_waits_for_stopping_run() {
        let (flag, run) = started();
        flag.stop();

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            drop(run);
        });

        let next = flag.try_start(Duration::from_secs(5));
        assert!(next.is_ok());
        assert_eq!(flag.state(), RunState::Running);
        releaser.join().unwrap();
    }

    #[test]
    fn n_frames_then_stream_end() {
        let capture = FakeCapture::with_frames(5);
        let detector = FakeDetector::default();
        let mut model = detector.model();
        let display = RecordingSink::default();
        let (flag, run) = started();

        let report = run_detection(
            &capture,
            &SourceDescriptor::Device(0),
            model.as_mut(),
            &display,
            run,
        );

        assert_eq!(report.frames, 5);
        assert_eq!(report.end, RunEnd::StreamEnded);
        assert_eq!(report.notice, Some(Notice::warning(READ_FAILURE)));
        assert!(report.mean_inference.is_some());
        assert_eq!(detector.inferences(), 5);
        assert_eq!(display.shown(), 5);
        assert_eq!(display.cleared(), 1);
        assert_eq!(capture.released(), 1);
        assert_eq!(flag.state(), RunState::Idle);
    }

    #[test]
    fn open_failure_stops_run() {
        let capture = FakeCapture::unavailable();
        let detector = FakeDetector::default();
        let mut model = detector.model();
        let display = RecordingSink::default();
        let (flag, run) = started();

        let report = run_detection(
            &capture,
            &SourceDescriptor::Device(0),
            model.as_mut(),
            &display,
            run,
        );

        assert_eq!(report.end, RunEnd::OpenFailed);
        assert_eq!(
            report.notice,
            Some(Notice::error("Error opening video source: 0"))
        );
        assert_eq!(report.mean_inference, None);
        assert_eq!(flag.state(), RunState::Idle);
        assert_eq!(capture.opened.load(Ordering::SeqCst), 1);
        assert_eq!(capture.released(), 0);
        assert_eq!(detector.inferences(), 0);
    }

    #[test]
    fn stop_takes_effect_at_iteration_boundary() {
        let (flag, run) = started();
        let capture = FakeCapture::with_frames(100).stopping_after(3, flag.clone());
        let detector = FakeDetector::default();
        let mut model = detector.model();
        let display = RecordingSink::default();

        let report = run_detection(
            &capture,
            &SourceDescriptor::Url("rtsp://cam".into()),
            model.as_mut(),
            &display,
            run,
        );

        // The frame read while stopping is still finished
        assert_eq!(report.frames, 3);
        assert_eq!(report.end, RunEnd::Stopped);
        assert_eq!(report.notice, None);
        assert_eq!(display.shown(), 3);
        assert_eq!(display.cleared(), 1);
        assert_eq!(capture.released(), 1);
        assert_eq!(flag.state(), RunState::Idle);
    }

    #[test]
    fn inference_failure_ends_run() {
        let capture = FakeCapture::with_frames(10);
        let detector = FakeDetector::failing_inference_after(2);
        let mut model = detector.model();
        let display = RecordingSink::default();
        let (flag, run) = started();

        let report = run_detection(
            &capture,
            &SourceDescriptor::Device(1),
            model.as_mut(),
            &display,
            run,
        );

        assert_eq!(report.frames, 2);
        assert_eq!(report.end, RunEnd::InferenceFailed);
        assert_eq!(report.notice.map(|n| n.level), Some(Level::Error));
        assert_eq!(capture.released(), 1);
        assert_eq!(display.cleared(), 1);
        assert!(!flag.is_running());
    }

    #[test]
    fn frames_are_displayed_in_rgb() {
        let capture = FakeCapture::with_frames(1).bgr();
        let detector = FakeDetector::default();
        let mut model = detector.model();
        let display = RecordingSink::default();
        let (_flag, run) = started();

        run_detection(
            &capture,
            &SourceDescriptor::Device(0),
            model.as_mut(),
            &display,
            run,
        );

        assert_eq!(display.last_pixel(), Some([1, 2, 3]));
    }
}
