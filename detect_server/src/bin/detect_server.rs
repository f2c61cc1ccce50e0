//! Object detection server binary.
//!
use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Result;
use capture::SystemCapture;
use clap::Parser;
use detect_server::{
    config::{AppConfig, INPUT_SIZE},
    display::DisplayHub,
    endpoints::router,
    export::NnefExporter,
    meter::spawn_meter_logger,
    nn::{TractDetector, YoloParams},
    session::Session,
    visualization::Annotator,
};
use env_logger::TimestampPrecision;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve the UI on
    #[clap(long, default_value = "127.0.0.1:8501")]
    server_address: String,

    /// Directory holding yolo11n.onnx and the optimized export
    #[clap(long, default_value = ".")]
    model_dir: PathBuf,

    /// TrueType font for box labels
    #[clap(long)]
    font: Option<PathBuf>,

    /// Minimum confidence of reported detections
    #[clap(long, default_value_t = 0.25)]
    confidence: f32,

    /// IoU above which overlapping boxes of a class are suppressed
    #[clap(long, default_value_t = 0.45)]
    iou: f32,

    /// Quality of the JPEG frames sent to the browser
    #[clap(long, default_value_t = 80)]
    jpeg_quality: u8,
}

impl From<Args> for AppConfig {
    fn from(args: Args) -> Self {
        AppConfig {
            model_dir: args.model_dir,
            font_path: args.font,
            min_confidence: args.confidence,
            max_iou: args.iou,
            jpeg_quality: args.jpeg_quality,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let addr: SocketAddr = args.server_address.parse()?;
    let config = AppConfig::from(args);
    log::info!("Using models from {}", config.model_dir.display());

    let annotator = Arc::new(Annotator::load(config.font_path.as_deref()));
    let params = YoloParams {
        input_size: INPUT_SIZE,
        min_confidence: config.min_confidence,
        max_iou: config.max_iou,
    };
    let display = Arc::new(DisplayHub::new(config.jpeg_quality));
    let session = Arc::new(Session::new(
        config,
        Arc::new(SystemCapture),
        Arc::new(TractDetector::new(params, annotator)),
        Arc::new(NnefExporter::new(INPUT_SIZE)),
        display.clone(),
    ));

    spawn_meter_logger();

    // Serve HTTP server
    log::info!("Serving UI on http://{addr}");
    axum::Server::bind(&addr)
        .serve(router(session, display).into_make_service())
        .await?;

    Ok(())
}
