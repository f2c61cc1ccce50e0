//! Commands issued by the UI: start and stop detection, export the model, query the state.
//!
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use capture::Capture;
use common::{Notice, SourceDescriptor, SourceSelection};
use serde::{Deserialize, Serialize};

use crate::{
    config::AppConfig,
    detection::{run_detection, RunFlag, RunGuard, RunReport, RunState, StartRefused},
    display::FrameSink,
    export::{export_model, Exporter},
    model::{load_model, Detector, InferModel, ModelVariant},
};

pub const ALREADY_RUNNING: &str = "Detection is already running.";
pub const STILL_STOPPING: &str = "The previous detection is still stopping. Please try again.";

/// How long a start waits for a stopping run to release its source.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Command interface of the detection service, independent of the UI serving it.
pub trait DetectionControl {
    /// Start a run and block until it ends. Returns the notices the run produced.
    fn start(&self, request: &StartRequest) -> Vec<Notice>;
    fn stop(&self);
    fn is_running(&self) -> bool;
}

/// Parameters of the Start command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StartRequest {
    #[serde(flatten)]
    pub source: SourceSelection,
    #[serde(default)]
    pub optimized: bool,
}

impl StartRequest {
    pub fn new(source: SourceSelection, optimized: bool) -> Self {
        Self { source, optimized }
    }
}

/// State reported to the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub running: bool,
    pub notices: Vec<Notice>,
}

/// A validated start: the source to open, the loaded model and the claim on the run.
pub struct PreparedRun {
    pub source: SourceDescriptor,
    pub model: Box<dyn InferModel>,
    run: RunGuard,
}

/// Detection service state shared by all requests.
pub struct Session {
    config: AppConfig,
    flag: RunFlag,
    capture: Arc<dyn Capture>,
    detector: Arc<dyn Detector>,
    exporter: Arc<dyn Exporter>,
    display: Arc<dyn FrameSink>,
    notices: Mutex<Vec<Notice>>,
}

impl Session {
    pub fn new(
        config: AppConfig,
        capture: Arc<dyn Capture>,
        detector: Arc<dyn Detector>,
        exporter: Arc<dyn Exporter>,
        display: Arc<dyn FrameSink>,
    ) -> Self {
        Self {
            config,
            flag: RunFlag::new(),
            capture,
            detector,
            exporter,
            display,
            notices: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Claim the run, validate the source and load the model.
    ///
    /// A run that is still stopping gets a short grace period to release its source. On failure
    /// the claim is given up and the reason is recorded as a notice.
    pub fn prepare(&self, request: &StartRequest) -> Result<PreparedRun, Notice> {
        let run = match self.flag.try_start(STOP_GRACE) {
            Ok(run) => run,
            Err(refused) => {
                let notice = match refused {
                    StartRefused::AlreadyRunning => Notice::warning(ALREADY_RUNNING),
                    StartRefused::StillStopping => Notice::warning(STILL_STOPPING),
                };
                self.record(notice.clone());
                return Err(notice);
            }
        };
        self.notices().clear();

        let prepared = request
            .source
            .resolve()
            .map_err(|e| Notice::error(e.to_string()))
            .and_then(move |source| {
                let variant = ModelVariant::from_optimized(request.optimized);
                load_model(self.detector.as_ref(), &self.config, variant)
                    .map(|model| PreparedRun { source, model, run })
            });

        if let Err(notice) = &prepared {
            log::warn!("Not starting detection: {}", notice.text);
            self.record(notice.clone());
        }
        prepared
    }

    /// Run the detection loop on a prepared start. Blocks until the run ends.
    pub fn run(&self, prepared: PreparedRun) -> RunReport {
        let PreparedRun {
            source,
            mut model,
            run,
        } = prepared;
        let report = run_detection(
            self.capture.as_ref(),
            &source,
            model.as_mut(),
            self.display.as_ref(),
            run,
        );
        if let Some(notice) = &report.notice {
            self.record(notice.clone());
        }
        report
    }

    /// Account for a run that ended without a report, such as a panic inside inference.
    pub fn run_aborted(&self, reason: &str) {
        log::error!("Detection aborted: {reason}");
        // A newer run may already own the display
        if self.flag.state() == RunState::Idle {
            self.display.clear();
        }
        self.record(Notice::error(format!(
            "Detection stopped unexpectedly: {reason}"
        )));
    }

    /// Export the baseline model to the optimized format. The running flag is not touched.
    pub fn export(&self) -> Notice {
        let notice = export_model(self.exporter.as_ref(), &self.config);
        let mut notices = self.notices();
        notices.clear();
        notices.push(notice.clone());
        notice
    }

    pub fn status(&self) -> Status {
        Status {
            running: self.flag.is_running(),
            notices: self.notices().clone(),
        }
    }

    fn record(&self, notice: Notice) {
        self.notices().push(notice);
    }

    fn notices(&self) -> MutexGuard<'_, Vec<Notice>> {
        // Notices stay readable even if a holder panicked
        self.notices.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DetectionControl for Session {
    fn start(&self, request: &StartRequest) -> Vec<Notice> {
        match self.prepare(request) {
            Ok(prepared) => self.run(prepared).notice.into_iter().collect(),
            Err(notice) => vec![notice],
        }
    }

    fn stop(&self) {
        if self.flag.is_running() {
            log::info!("Stopping detection");
        }
        self.flag.stop();
    }

    fn is_running(&self) -> bool {
        self.flag.is_running()
    }
}
