//! Endpoints of HTTP server.
//!
use std::{convert::Infallible, sync::Arc};

use axum::{
    body::StreamBody,
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    routing::{get, post},
    Extension, Json, Router,
};
use futures::{stream, StreamExt};
use tokio::task::spawn_blocking;
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    display::{DisplayHub, BOUNDARY},
    page::INDEX_HTML,
    session::{DetectionControl, PreparedRun, Session, StartRequest, Status},
};

/// Build the UI router around a session and the display it renders to.
pub fn router(session: Arc<Session>, display: Arc<DisplayHub>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
        .route("/stream", get(display_stream))
        .route("/status", get(status))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/export", post(export))
        .layer(Extension(session))
        .layer(Extension(display))
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn status(Extension(session): Extension<Arc<Session>>) -> Json<Status> {
    Json(session.status())
}

/// Validate the request and load the model, then run detection in the background.
pub async fn start(
    Extension(session): Extension<Arc<Session>>,
    Json(request): Json<StartRequest>,
) -> Result<Json<Status>, StatusCode> {
    log::info!("Start requested: {:?}", request);

    let prepared = {
        let session = session.clone();
        spawn_blocking(move || session.prepare(&request))
            .await
            .map_err(|e| {
                log::error!("Start task failed: {e}");
                StatusCode::INTERNAL_SERVER_ERROR
            })?
    };

    if let Ok(prepared) = prepared {
        spawn_run(session.clone(), prepared);
    }

    Ok(Json(session.status()))
}

/// Run detection on a blocking thread and watch it until it ends.
fn spawn_run(session: Arc<Session>, prepared: PreparedRun) {
    let runner = session.clone();
    let task = spawn_blocking(move || runner.run(prepared));
    tokio::spawn(async move {
        if let Err(e) = task.await {
            log::error!("Detection task failed: {e}");
            session.run_aborted(&e.to_string());
        }
    });
}

pub async fn stop(Extension(session): Extension<Arc<Session>>) -> Json<Status> {
    session.stop();
    Json(session.status())
}

pub async fn export(
    Extension(session): Extension<Arc<Session>>,
) -> Result<Json<Status>, StatusCode> {
    let session_ = session.clone();
    spawn_blocking(move || session_.export())
        .await
        .map_err(|e| {
            log::error!("Export task failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(session.status()))
}

/// Multipart stream of the display region.
pub async fn display_stream(Extension(display): Extension<Arc<DisplayHub>>) -> impl IntoResponse {
    log::info!("Display stream requested");
    let rx = display.subscribe();

    // New viewers see the placeholder until the next frame arrives
    let first = match display.is_showing() {
        true => None,
        false => display.blank_item().ok(),
    };

    // Lagging viewers skip the frames they missed
    let frames = BroadcastStream::new(rx).filter_map(|item| async move { item.ok() });
    let stream = stream::iter(first).chain(frames).map(Ok::<_, Infallible>);

    // Set body and headers for multipart streaming
    let body = StreamBody::new(stream);
    let headers = [(
        header::CONTENT_TYPE,
        format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
    )];

    (headers, body)
}
