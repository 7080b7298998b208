use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::camera::{session::SessionManager, traits::CameraAdapter};
use crate::core::errors::CameraError;

/// Error code for a request naming no known command.
const ERR_UNKNOWN_COMMAND: u8 = 2;
/// Error code for a missing or malformed parameter.
const ERR_BAD_REQUEST: u8 = 1;

/// Body of a control-channel request: a command name plus whatever
/// parameters that command needs. Unknown extra fields are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct CommandRequest {
    #[serde(rename = "CMD")]
    pub cmd: Option<String>,
    pub interval_seconds: Option<f64>,
    pub total_frames: Option<i64>,
    pub filename: Option<String>,
    pub shutter_us: Option<u32>,
    pub analog_gain: Option<f32>,
}

pub fn bad_request(message: impl Into<String>) -> Value {
    json!({ "ERR": ERR_BAD_REQUEST, "message": message.into() })
}

fn unknown_command(cmd: &str) -> Value {
    json!({ "ERR": ERR_UNKNOWN_COMMAND, "message": format!("unknown command {cmd:?}") })
}

fn failure(err: CameraError) -> Value {
    json!({ "ERR": err.code(), "message": err.to_string() })
}

/// Run one command against the session manager. Every request gets a
/// structured response; no error kind escapes to the transport layer.
pub async fn dispatch<A: CameraAdapter>(
    session: &SessionManager<A>,
    request: CommandRequest,
) -> Value {
    let Some(cmd) = request.cmd.as_deref() else {
        return bad_request("missing CMD");
    };

    match cmd {
        "TIMELAPSE_START" => {
            let (Some(interval), Some(frames)) = (request.interval_seconds, request.total_frames)
            else {
                return bad_request("TIMELAPSE_START needs interval_seconds and total_frames");
            };
            match session.start_timelapse(interval, frames).await {
                Ok(progress) => json!({ "OK": 1, "timelapse": progress }),
                Err(err) => failure(err),
            }
        }
        "TIMELAPSE_STOP" => match session.stop_timelapse().await {
            Ok(()) => json!({ "OK": 1 }),
            Err(err) => failure(err),
        },
        "STREAM_START" => match session.start_stream().await {
            Ok(info) => json!({ "OK": 1, "url": info.url }),
            Err(err) => failure(err),
        },
        "STREAM_STOP" => match session.stop_stream().await {
            Ok(()) => json!({ "OK": 1 }),
            Err(err) => failure(err),
        },
        "STILL" => capture(session, request.filename, "still", false).await,
        "HISTOGRAM" => capture(session, request.filename, "histogram", true).await,
        "EXPOSURE" => {
            if request.shutter_us.is_none() && request.analog_gain.is_none() {
                return bad_request("EXPOSURE needs shutter_us and/or analog_gain");
            }
            match session
                .configure_exposure(request.shutter_us, request.analog_gain)
                .await
            {
                Ok(()) => json!({ "OK": 1 }),
                Err(err) => failure(err),
            }
        }
        "STATUS" => json!({ "OK": 1, "status": session.status() }),
        other => unknown_command(other),
    }
}

async fn capture<A: CameraAdapter>(
    session: &SessionManager<A>,
    filename: Option<String>,
    prefix: &str,
    overlay: bool,
) -> Value {
    let name = match filename {
        Some(name) => match sanitize_filename(&name) {
            Ok(name) => name,
            Err(message) => return bad_request(message),
        },
        None => format!("{prefix}_{}.jpg", Utc::now().format("%Y%m%d_%H%M%S%3f")),
    };
    let destination = session.stills_dir().join(&name);

    let result = if overlay {
        session.capture_histogram_overlay(&destination).await
    } else {
        session.capture_still(&destination).await
    };
    match result {
        Ok(metadata) => json!({
            "OK": 1,
            "path": format!("/stills/{name}"),
            "metadata": metadata,
        }),
        Err(err) => failure(err),
    }
}

fn sanitize_filename(name: &str) -> Result<String, String> {
    if name.is_empty() {
        return Err("filename must not be empty".to_string());
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err("filename must be a bare file name".to_string());
    }
    Ok(name.to_string())
}
