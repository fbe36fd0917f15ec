pub mod health;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use deckforge::{ConversionService, DeckforgeError};

/// Shared application state for the Axum server.
pub struct AppState {
    pub service: ConversionService,
}

impl AppState {
    pub fn new(service: ConversionService) -> Self {
        Self { service }
    }
}

/// Create the Axum router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/presentations/{id}/enqueue_conversion",
            post(routes::enqueue_conversion),
        )
        .route("/presentations/{id}/uploaded", post(routes::uploaded))
        .route(
            "/presentations/{id}/conversion_status",
            get(routes::conversion_status),
        )
        .route(
            "/presentations/{id}/conversion_logs",
            get(routes::conversion_logs),
        )
        .route("/presentations/{id}/thumbnails", get(routes::thumbnails))
        .route("/presentations/{id}/slide/{index}", get(routes::slide))
        .route("/presentations/{id}/converted_pdf", get(routes::converted_pdf))
        .route("/api/presentations/{id}/preview", get(routes::preview))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serves until Ctrl-C.
pub async fn run(state: Arc<AppState>, bind: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;

    log::info!("Listening on http://{}", bind);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl-C: {}", e);
            }
            log::info!("Shutdown requested");
        })
        .await
        .context("HTTP server failed")
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

/// Handler error: `NotFound` becomes 404, anything else 500.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Internal(String),
}

impl From<DeckforgeError> for ApiError {
    fn from(err: DeckforgeError) -> Self {
        match err {
            DeckforgeError::NotFound(what) => ApiError::NotFound(format!("Not found: {}", what)),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, detail),
            ApiError::Internal(detail) => {
                tracing::error!("Request failed: {}", detail);
                (StatusCode::INTERNAL_SERVER_ERROR, detail)
            }
        };
        (status, Json(ErrorResponse { detail })).into_response()
    }
}

/// Runs a service call on the blocking pool. Conversions, subprocesses and
/// SQLite all block.
pub async fn blocking<T, F>(state: &Arc<AppState>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&ConversionService) -> deckforge::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || f(&state.service))
        .await
        .map_err(|e| ApiError::Internal(format!("Task failed: {}", e)))?
        .map_err(ApiError::from)
}

// ===========================================================================
// Tests
// ===========================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use deckforge::db::{job_repo, Database, JobStatus};
    use deckforge::processor::{
        FormatConverter, MediaTools, PdftoppmRasterizer, SofficeConverter, ThumbnailRenderer,
    };
    use deckforge::queue::{MemoryBroker, QueueAdapter};
    use deckforge::storage::StorageLayout;
    use deckforge::ConversionRunner;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestApp {
        _dir: TempDir,
        state: Arc<AppState>,
        broker: Arc<MemoryBroker>,
    }

    impl TestApp {
        fn new(background: bool) -> Self {
            let dir = TempDir::new().unwrap();
            let db = Database::open_in_memory().unwrap();
            let storage = StorageLayout::new(dir.path());
            let converter = FormatConverter::new(
                Box::new(SofficeConverter::new("/nonexistent/soffice")),
                ThumbnailRenderer::with_backends(vec![]),
                Box::new(PdftoppmRasterizer::new("/nonexistent/pdftoppm")),
                MediaTools::new("/nonexistent/ffmpeg"),
            );
            let runner = Arc::new(ConversionRunner::new(
                db.clone(),
                storage.clone(),
                Arc::new(converter),
                10,
            ));
            let broker = Arc::new(MemoryBroker::new());
            let queue = QueueAdapter::new(broker.clone(), db.clone());
            let service = ConversionService::new(db, storage, runner, Some(queue), background);

            Self {
                _dir: dir,
                state: Arc::new(AppState::new(service)),
                broker,
            }
        }

        fn router(&self) -> Router {
            create_router(Arc::clone(&self.state))
        }

        fn storage(&self) -> &StorageLayout {
            self.state.service.storage()
        }

        fn db(&self) -> &Database {
            self.state.service.database()
        }
    }

    async fn get(app: Router, uri: &str) -> Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
        app.oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = TestApp::new(false);
        let response = get(app.router(), "/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_status_none_for_unknown_presentation() {
        let app = TestApp::new(true);
        let response = get(app.router(), "/presentations/7/conversion_status").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "none");
        assert!(json["job_id"].is_null());
        assert!(json["result"].is_null());
        assert!(job_repo::find_latest(app.db(), 7).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enqueue_publishes_when_background_enabled() {
        let app = TestApp::new(true);
        let response = post_json(
            app.router(),
            "/presentations/42/enqueue_conversion",
            serde_json::json!({"filename": "deck.pptx"}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["enqueued"], true);
        assert_eq!(json["mode"], "queue");
        assert_eq!(app.broker.pending(), 1);

        let status = body_json(get(app.router(), "/presentations/42/conversion_status").await).await;
        assert_eq!(status["status"], "queued");
        assert_eq!(status["job_id"], json["job_id"]);
    }

    #[tokio::test]
    async fn test_enqueue_inline_when_background_disabled() {
        let app = TestApp::new(false);
        std::fs::write(app.storage().upload_path("paper.pdf"), b"%PDF").unwrap();

        let response = post_json(
            app.router(),
            "/presentations/3/enqueue_conversion",
            serde_json::json!({"filename": "paper.pdf"}),
        )
        .await;
        let json = body_json(response).await;
        assert_eq!(json["mode"], "inline");
        assert!(json["job_id"].as_str().unwrap().starts_with("local-"));
        assert_eq!(app.broker.pending(), 0);

        let job = job_repo::find_latest(app.db(), 3).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Finished);

        let logs = body_json(get(app.router(), "/presentations/3/conversion_logs").await).await;
        assert!(logs["log"].as_str().unwrap().contains("starting conversion"));
    }

    #[tokio::test]
    async fn test_thumbnails_trigger_conversion_once_dir_missing() {
        let app = TestApp::new(true);
        let response = get(app.router(), "/presentations/5/thumbnails?filename=deck.pptx").await;
        let json = body_json(response).await;

        assert_eq!(json["thumbnails"], serde_json::json!([]));
        assert_eq!(json["status"], "queued");
        assert_eq!(app.broker.pending(), 1);
    }

    #[tokio::test]
    async fn test_thumbnails_list_in_page_order() {
        let app = TestApp::new(true);
        let dir = app.storage().thumbs_dir(9);
        std::fs::create_dir_all(&dir).unwrap();
        for index in [10, 2, 0, 1] {
            std::fs::write(dir.join(format!("slide_{}.png", index)), b"png").unwrap();
        }

        let json = body_json(get(app.router(), "/presentations/9/thumbnails").await).await;
        assert_eq!(
            json["thumbnails"],
            serde_json::json!([
                "/presentations/9/slide/0",
                "/presentations/9/slide/1",
                "/presentations/9/slide/2",
                "/presentations/9/slide/10",
            ])
        );
        assert!(json.get("status").is_none());
        assert_eq!(app.broker.pending(), 0);
    }

    #[tokio::test]
    async fn test_slide_served_as_png_or_404() {
        let app = TestApp::new(false);
        let dir = app.storage().thumbs_dir(1);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("slide_0.png"), b"png-bytes").unwrap();

        let response = get(app.router(), "/presentations/1/slide/0").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"png-bytes");

        let missing = get(app.router(), "/presentations/1/slide/4").await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let json = body_json(missing).await;
        assert!(json["detail"].as_str().unwrap().contains("slide 4"));
    }

    #[tokio::test]
    async fn test_converted_pdf_disposition() {
        let app = TestApp::new(false);
        assert_eq!(
            get(app.router(), "/presentations/2/converted_pdf").await.status(),
            StatusCode::NOT_FOUND
        );

        std::fs::write(app.storage().upload_path("deck.pdf"), b"%PDF-1.4").unwrap();
        let row = job_repo::create(app.db(), 2, JobStatus::Queued, Some("job-1")).unwrap();
        job_repo::update(
            app.db(),
            row.id,
            &job_repo::JobUpdate::status(JobStatus::Started),
        )
        .unwrap();
        job_repo::update(
            app.db(),
            row.id,
            &job_repo::JobUpdate::status(JobStatus::Finished).with_result("deck.pdf"),
        )
        .unwrap();

        let inline = get(app.router(), "/presentations/2/converted_pdf?inline=1").await;
        assert_eq!(inline.status(), StatusCode::OK);
        assert_eq!(inline.headers()[header::CONTENT_TYPE], "application/pdf");
        assert_eq!(
            inline.headers()[header::CONTENT_DISPOSITION],
            "inline; filename=\"deck.pdf\""
        );

        let download = get(app.router(), "/presentations/2/converted_pdf").await;
        assert_eq!(
            download.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"deck.pdf\""
        );
    }

    #[tokio::test]
    async fn test_uploaded_pdf_is_viewable_without_job() {
        let app = TestApp::new(true);
        let json = body_json(
            post_json(
                app.router(),
                "/presentations/8/uploaded",
                serde_json::json!({"filename": "paper.pdf"}),
            )
            .await,
        )
        .await;

        assert_eq!(json["outcome"], "viewable");
        assert!(json["job_id"].is_null());
        assert!(job_repo::find_latest(app.db(), 8).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_preview_reports_unsupported() {
        let app = TestApp::new(true);
        let json = body_json(
            get(app.router(), "/api/presentations/4/preview?filename=notes.xyz").await,
        )
        .await;

        assert_eq!(json["conversion_status"], "unsupported");
        assert!(json["viewer_url"].is_null());
        assert_eq!(json["original_url"], "/download/notes.xyz?inline=1");
    }

    #[test]
    fn test_not_found_maps_to_404() {
        let response = ApiError::from(DeckforgeError::NotFound("slide 1".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
