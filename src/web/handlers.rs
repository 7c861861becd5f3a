use std::sync::Arc;

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::{
    app_state::AppState,
    camera::driver::CameraInfo,
    capture::orchestrator::CaptureEntry,
    core::{
        errors::AppError,
        state::{Composition, FrameMode},
    },
    frame::{
        store::{FrameConfig, FrameUpdate},
        zone::FrameZone,
    },
};

pub const MAX_BURST_FRAMES: usize = 12;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    capture_in_progress: bool,
}

#[derive(Debug, Serialize)]
pub struct CaptureResponse {
    id: String,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    absolute_url: Option<String>,
    composition: Composition,
    frames: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BurstAction {
    /// One shot of a client-paced burst.
    #[default]
    Capture,
    /// Trigger and assemble the whole burst in one request.
    Sequence,
    /// Assemble the latest shots of a client-paced burst.
    Assemble,
}

#[derive(Debug, Default, Deserialize)]
pub struct BurstRequest {
    #[serde(default)]
    action: BurstAction,
    count: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CameraInfoQuery {
    port: Option<String>,
}

/// Zone as posted by the frame editor; `id` is optional.
#[derive(Debug, Deserialize)]
struct ZoneInput {
    id: Option<String>,
    left: f64,
    top: f64,
    width: f64,
    height: f64,
}

fn capture_response(state: &AppState, entry: CaptureEntry) -> CaptureResponse {
    let url = state.photo_url(&entry.output_path);
    CaptureResponse {
        absolute_url: state.absolute_url(&url),
        frames: entry
            .frame_output_paths
            .iter()
            .map(|path| state.photo_url(path))
            .collect(),
        id: entry.id,
        url,
        composition: entry.composition,
    }
}

/// Malformed or empty bodies fall back to the default request, a single
/// shutter release.
fn parse_burst_request(body: &[u8]) -> BurstRequest {
    if body.iter().all(u8::is_ascii_whitespace) {
        return BurstRequest::default();
    }
    serde_json::from_slice(body).unwrap_or_default()
}

fn zones_from_json(raw: &str) -> Result<Vec<FrameZone>, AppError> {
    let inputs: Vec<ZoneInput> = serde_json::from_str(raw)
        .map_err(|err| AppError::new(StatusCode::BAD_REQUEST, format!("invalid zones: {err}")))?;
    Ok(inputs
        .into_iter()
        .map(|zone| FrameZone {
            id: zone
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| format!("{:08x}", rand::random::<u32>())),
            left: zone.left,
            top: zone.top,
            width: zone.width,
            height: zone.height,
        })
        .collect())
}

fn multipart_error(err: impl std::fmt::Display) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, format!("invalid multipart body: {err}"))
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        capture_in_progress: state.orchestrator.is_busy(),
    })
}

pub async fn capture(State(state): State<Arc<AppState>>) -> Result<Json<CaptureResponse>, AppError> {
    let entry = state.orchestrator.capture_single().await.map_err(|err| {
        let reason = err.to_string();
        let app_err = AppError::from(err);
        error!(status = app_err.status().as_u16(), "single capture failed: {reason}");
        app_err
    })?;
    info!(id = %entry.id, path = %entry.output_path.display(), "single capture stored");
    Ok(Json(capture_response(&state, entry)))
}

pub async fn capture_burst(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, AppError> {
    let request = parse_burst_request(&body);
    let count = request.count.unwrap_or(state.orchestrator.burst_count());
    if !(1..=MAX_BURST_FRAMES).contains(&count) {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            format!("count must be between 1 and {MAX_BURST_FRAMES}"),
        ));
    }

    let outcome = match request.action {
        BurstAction::Capture => state.orchestrator.trigger_only().await.map(|()| None),
        BurstAction::Assemble => state.orchestrator.assemble_burst(Some(count)).await.map(Some),
        BurstAction::Sequence => state.orchestrator.capture_burst(Some(count)).await.map(Some),
    };
    match outcome {
        Ok(None) => {
            info!("burst shot triggered");
            Ok(Json(json!({ "success": true })).into_response())
        }
        Ok(Some(entry)) => {
            info!(id = %entry.id, composition = ?entry.composition, "burst stored");
            Ok(Json(capture_response(&state, entry)).into_response())
        }
        Err(err) => {
            error!(action = ?request.action, "burst failed: {err}");
            Err(err.into())
        }
    }
}

pub async fn camera_info(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CameraInfoQuery>,
) -> Result<Json<CameraInfo>, AppError> {
    let port = query.port.filter(|port| !port.trim().is_empty());
    let info = state.orchestrator.camera_info(port).await?;
    Ok(Json(info))
}

pub async fn get_frame_config(
    State(state): State<Arc<AppState>>,
    Path(mode): Path<String>,
) -> Result<Json<FrameConfig>, AppError> {
    let mode: FrameMode = mode.parse()?;
    Ok(Json(state.orchestrator.frames().get_frame_config(mode).await?))
}

/// Multipart fields: `zones` (JSON array) and `frame` (overlay image).
pub async fn save_frame_config(
    State(state): State<Arc<AppState>>,
    Path(mode): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<FrameConfig>, AppError> {
    let mode: FrameMode = mode.parse()?;

    let mut update = FrameUpdate::default();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("zones") => {
                let raw = field.text().await.map_err(multipart_error)?;
                if !raw.trim().is_empty() {
                    update.zones = Some(zones_from_json(&raw)?);
                }
            }
            Some("frame") => {
                let data = field.bytes().await.map_err(multipart_error)?;
                if !data.is_empty() {
                    update.image = Some(data);
                }
            }
            _ => {}
        }
    }

    let config = state
        .orchestrator
        .frames()
        .save_frame_config(mode, update)
        .await?;
    Ok(Json(config))
}
