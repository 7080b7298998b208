use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{State, rejection::JsonRejection},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
    response::{IntoResponse, Redirect, Response},
};
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::{fs, sync::mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::{
    app_state::AppState,
    core::{errors::AppError, status::StatusSnapshot},
};

use super::command::{self, CommandRequest};

const MJPEG_BOUNDARY: &str = "picamframe";

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

pub async fn root() -> Redirect {
    Redirect::to("/static/index.html")
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Non-blocking status poll; reads the published snapshot only.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusSnapshot> {
    Json(state.session.status())
}

/// The JSON command channel. A body that is not valid JSON for the
/// command shape still gets a structured bad-request response.
pub async fn command(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CommandRequest>, JsonRejection>,
) -> Json<Value> {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            debug!("malformed command body: {rejection}");
            return Json(command::bad_request(format!(
                "malformed command body: {rejection}"
            )));
        }
    };
    Json(command::dispatch(&state.session, request).await)
}

pub async fn still(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let name = format!("still_{}.jpg", Utc::now().format("%Y%m%d_%H%M%S%3f"));
    let destination = state.session.stills_dir().join(&name);

    let metadata = state.session.capture_still(&destination).await?;
    info!(device = %metadata.device, "still captured to {name}");

    serve_jpeg_file(&destination).await
}

pub async fn histogram(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let name = format!("histogram_{}.jpg", Utc::now().format("%Y%m%d_%H%M%S%3f"));
    let destination = state.session.stills_dir().join(&name);

    let metadata = state.session.capture_histogram_overlay(&destination).await?;
    info!(device = %metadata.device, "histogram overlay captured to {name}");

    serve_jpeg_file(&destination).await
}

/// Live MJPEG delivery over the single-slot frame cell. Opening the
/// stream starts the session when idle and joins it when already live;
/// each client only ever receives the freshest frame.
pub async fn stream(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let (_info, mut reader) = state.session.open_stream().await?;

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(2);
    tokio::spawn(async move {
        while let Some(frame) = reader.next().await {
            if tx.send(Ok(mjpeg_part(&frame))).await.is_err() {
                break;
            }
        }
        info!("stream client disconnected or session ended");
    });

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("multipart/x-mixed-replace; boundary=picamframe"),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

    Ok((
        StatusCode::OK,
        headers,
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response())
}

fn mjpeg_part(frame: &Bytes) -> Bytes {
    let mut part = Vec::with_capacity(frame.len() + 128);
    part.extend_from_slice(
        format!(
            "--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            frame.len()
        )
        .as_bytes(),
    );
    part.extend_from_slice(frame);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

async fn serve_jpeg_file(path: &std::path::Path) -> Result<Response, AppError> {
    let data = fs::read(path)
        .await
        .map_err(|err| AppError::internal(format!("failed to read capture: {err}")))?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok((StatusCode::OK, headers, data).into_response())
}
