use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use deckforge::{ConversionStatus, ThumbnailListing, UploadOutcome, ViewerState};

use super::{blocking, ApiError, AppState};

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct FilenameBody {
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub struct ThumbnailParams {
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PreviewParams {
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub struct PdfParams {
    #[serde(default)]
    pub inline: Option<String>,
}

impl PdfParams {
    fn is_inline(&self) -> bool {
        matches!(
            self.inline.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("1" | "true" | "yes")
        )
    }
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub enqueued: bool,
    pub job_id: String,
    pub mode: &'static str,
}

#[derive(Debug, Serialize)]
pub struct LogResponse {
    pub log: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub outcome: &'static str,
    pub job_id: Option<String>,
    pub mode: Option<&'static str>,
}

impl From<UploadOutcome> for UploadResponse {
    fn from(outcome: UploadOutcome) -> Self {
        match outcome {
            UploadOutcome::Viewable => Self {
                outcome: "viewable",
                job_id: None,
                mode: None,
            },
            UploadOutcome::Unsupported => Self {
                outcome: "unsupported",
                job_id: None,
                mode: None,
            },
            UploadOutcome::Conversion(dispatch) => Self {
                outcome: "conversion",
                job_id: Some(dispatch.job_id().to_string()),
                mode: Some(dispatch.mode()),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn enqueue_conversion(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<FilenameBody>,
) -> Result<Json<EnqueueResponse>, ApiError> {
    let dispatch = blocking(&state, move |svc| svc.request_conversion(id, &body.filename)).await?;

    Ok(Json(EnqueueResponse {
        enqueued: true,
        job_id: dispatch.job_id().to_string(),
        mode: dispatch.mode(),
    }))
}

pub async fn uploaded(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<FilenameBody>,
) -> Result<Json<UploadResponse>, ApiError> {
    let outcome = blocking(&state, move |svc| svc.on_upload(id, &body.filename)).await?;
    Ok(Json(outcome.into()))
}

pub async fn conversion_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ConversionStatus>, ApiError> {
    blocking(&state, move |svc| svc.get_status(id)).await.map(Json)
}

pub async fn conversion_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<LogResponse>, ApiError> {
    let log = blocking(&state, move |svc| svc.get_log(id)).await?;
    Ok(Json(LogResponse { log }))
}

pub async fn thumbnails(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(params): Query<ThumbnailParams>,
) -> Result<Json<ThumbnailListing>, ApiError> {
    blocking(&state, move |svc| {
        svc.list_thumbnails(id, params.filename.as_deref())
    })
    .await
    .map(Json)
}

pub async fn slide(
    State(state): State<Arc<AppState>>,
    Path((id, index)): Path<(i64, usize)>,
) -> Result<Response, ApiError> {
    let bytes = blocking(&state, move |svc| svc.slide_image(id, index)).await?;
    Ok((StatusCode::OK, [(header::CONTENT_TYPE, "image/png")], bytes).into_response())
}

pub async fn converted_pdf(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(params): Query<PdfParams>,
) -> Result<Response, ApiError> {
    let pdf = blocking(&state, move |svc| svc.converted_pdf(id)).await?;

    let disposition = if params.is_inline() {
        "inline"
    } else {
        "attachment"
    };
    let disposition = format!("{}; filename=\"{}\"", disposition, pdf.filename.replace('"', ""));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        pdf.bytes,
    )
        .into_response())
}

pub async fn preview(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(params): Query<PreviewParams>,
) -> Result<Json<ViewerState>, ApiError> {
    blocking(&state, move |svc| svc.preview(id, &params.filename))
        .await
        .map(Json)
}
