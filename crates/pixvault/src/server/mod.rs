//! HTTP surface over the ingestion service.
//!
//! ```text
//! POST /jobs                  submit an import request      → 202 {jobId}
//! GET  /jobs                  list jobs, newest first
//! GET  /jobs/:id              job snapshot
//! POST /jobs/:id/cancel       request cancellation          → 202 | 409
//! GET  /jobs/:id/outcomes     per-item outcome log
//! GET  /images/:id            image record
//! GET  /images/:id/thumbnail  thumbnail bytes
//! GET  /health
//! ```

mod error;
mod routes;

pub use error::ApiError;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use pixvault_core::Pixvault;

#[derive(Clone)]
pub struct AppState {
    pub pixvault: Arc<Pixvault>,
}

pub fn router(pixvault: Arc<Pixvault>) -> Router {
    Router::new()
        .route("/jobs", post(routes::submit_job).get(routes::list_jobs))
        .route("/jobs/:id", get(routes::get_job))
        .route("/jobs/:id/cancel", post(routes::cancel_job))
        .route("/jobs/:id/outcomes", get(routes::job_outcomes))
        .route("/images/:id", get(routes::get_image))
        .route("/images/:id/thumbnail", get(routes::get_thumbnail))
        .route("/health", get(routes::health))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { pixvault })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use pixvault_core::config::StorageBackend;
    use pixvault_core::{Config, JobSnapshot, JobState};
    use std::io::Cursor;
    use tower::ServiceExt;

    async fn app() -> (Router, Arc<Pixvault>) {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Memory;
        let pixvault = Arc::new(Pixvault::new(config).await.unwrap());
        (router(Arc::clone(&pixvault)), pixvault)
    }

    fn png_base64() -> String {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([10, 20, 30])));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        STANDARD.encode(buf.into_inner())
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_submit_then_poll() {
        let (app, pixvault) = app().await;
        let response = app
            .clone()
            .oneshot(post_json(
                "/jobs",
                serde_json::json!({
                    "kind": "single-upload",
                    "payload": { "filename": "sunset.png", "data": png_base64() }
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let job_id: pixvault_core::JobId =
            serde_json::from_value(body_json(response).await["jobId"].clone()).unwrap();

        pixvault.wait(job_id).await.unwrap();

        let response = app
            .clone()
            .oneshot(get(&format!("/jobs/{job_id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let snap: JobSnapshot = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(snap.state, JobState::Completed);
        assert_eq!(snap.succeeded, 1);

        let response = app
            .clone()
            .oneshot(get(&format!("/jobs/{job_id}/outcomes")))
            .await
            .unwrap();
        let outcomes = body_json(response).await;
        let image_id = outcomes[0]["imageId"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(get(&format!("/images/{image_id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["title"], "sunset");

        let response = app
            .oneshot(get(&format!("/images/{image_id}/thumbnail")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "image/webp");
    }

    #[tokio::test]
    async fn test_unknown_job_is_404() {
        let (app, _) = app().await;
        let id = pixvault_core::JobId::new();
        let response = app.clone().oneshot(get(&format!("/jobs/{id}"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(post_json(&format!("/jobs/{id}/cancel"), serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_requests_are_400() {
        let (app, _) = app().await;
        let response = app.clone().oneshot(get("/jobs/not-a-uuid")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(post_json(
                "/jobs",
                serde_json::json!({ "kind": "ftp-mirror", "payload": {} }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel_finished_job_is_409() {
        let (app, pixvault) = app().await;
        let job = pixvault
            .submit(pixvault_core::ImportRequest::ArchiveImport {
                path: "/nonexistent/archive.zip".into(),
            })
            .await
            .unwrap();
        assert_eq!(pixvault.wait(job).await.unwrap().state, JobState::Failed);

        let response = app
            .oneshot(post_json(&format!("/jobs/{job}/cancel"), serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app().await;
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["activeJobs"], 0);
    }
}
