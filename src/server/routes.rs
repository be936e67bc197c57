//! HTTP routes. The prediction route never fails at the HTTP level: every
//! problem with the canvas comes back as a 200 with an `error` message

use super::protocol::{HealthResponse, PredictRequest, PredictResponse};
use crate::error::PredictError;
use crate::service::PredictionService;
use actix_files::NamedFile;
use actix_web::{get, post, web, HttpResponse, Responder};
use std::path::PathBuf;
use tracing::*;

/// Response header carrying `PredictError::kind` on failed predictions
pub const ERROR_KIND_HEADER: &str = "X-Error-Kind";

/// Directory holding the built front end
#[derive(Debug, Clone)]
pub struct StaticDir(pub PathBuf);

#[post("/api/predict")]
pub async fn predict(
    req: web::Json<PredictRequest>,
    state: web::Data<PredictionService>,
) -> HttpResponse {
    debug!("got request {:?}", req);
    let image = req.into_inner().image;

    // Decoding and inference are CPU bound, keep them off the event loop
    let outcome = match web::block(move || state.predict(&image)).await {
        Ok(outcome) => outcome,
        Err(e) => Err(PredictError::Inference(e.to_string())),
    };

    match outcome {
        Ok(prediction) => {
            info!(
                digit = prediction.predicted_number,
                score = prediction.score,
                "finished serving prediction request"
            );
            HttpResponse::Ok().json(PredictResponse::from(prediction))
        }
        Err(err) => {
            warn!(kind = err.kind(), "prediction failed: {err}");
            HttpResponse::Ok()
                .insert_header((ERROR_KIND_HEADER, err.kind()))
                .json(PredictResponse::from(&err))
        }
    }
}

/// Liveness plus the model backend in use
#[get("/api/health")]
pub async fn health(state: web::Data<PredictionService>) -> impl Responder {
    web::Json(HealthResponse {
        status: "ok".into(),
        model: state.model_kind().into(),
    })
}

#[get("/")]
pub async fn index(dir: web::Data<StaticDir>) -> actix_web::Result<NamedFile> {
    Ok(NamedFile::open(dir.0.join("index.html"))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test::{as_canvas_rgba, blank_canvas, data_url, seven, StubClassifier};
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use image::DynamicImage;
    use serde_json::{json, Value};

    const JSON_LIMIT: usize = 4 * 1024 * 1024;

    fn state(model: StubClassifier) -> web::Data<PredictionService> {
        web::Data::new(PredictionService::new(Box::new(model)))
    }

    async fn post_image(model: StubClassifier, image: &str) -> (StatusCode, Option<String>, Value) {
        let app = test::init_service(
            App::new()
                .app_data(state(model))
                .configure(|cfg| crate::server::configure(cfg, JSON_LIMIT)),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/api/predict")
            .set_json(json!({ "image": image }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        let status = resp.status();
        let kind = resp
            .headers()
            .get(ERROR_KIND_HEADER)
            .map(|v| v.to_str().unwrap().to_string());
        (status, kind, test::read_body_json(resp).await)
    }

    #[actix_web::test]
    async fn black_canvas_returns_blackboard() {
        let url = data_url(&DynamicImage::ImageLuma8(blank_canvas(28, 28)));
        let (status, kind, body) = post_image(StubClassifier::confident(7, 0.9), &url).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(kind.as_deref(), Some("blank_canvas"));
        assert_eq!(body, json!({ "error": "blackboard" }));
    }

    #[actix_web::test]
    async fn drawn_seven_returns_a_prediction() {
        let url = data_url(&DynamicImage::ImageRgba8(as_canvas_rgba(&seven(280))));
        let (status, kind, body) = post_image(StubClassifier::confident(7, 0.934), &url).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(kind, None);
        assert_eq!(body, json!({ "predicted_number": 7, "score": 0.93 }));
    }

    #[actix_web::test]
    async fn malformed_payload_is_still_200() {
        let (status, kind, body) = post_image(StubClassifier::confident(7, 0.9), "nocomma").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(kind.as_deref(), Some("malformed_payload"));
        let response: PredictResponse = serde_json::from_value(body).unwrap();
        assert!(matches!(response, PredictResponse::Error { .. }));
    }

    #[actix_web::test]
    async fn inference_failure_is_still_200() {
        let url = data_url(&DynamicImage::ImageLuma8(seven(28)));
        let (status, kind, _) = post_image(StubClassifier::failing(), &url).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(kind.as_deref(), Some("inference"));
    }

    #[actix_web::test]
    async fn body_without_image_is_rejected_by_the_extractor() {
        let app = test::init_service(
            App::new()
                .app_data(state(StubClassifier::confident(7, 0.9)))
                .configure(|cfg| crate::server::configure(cfg, JSON_LIMIT)),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/api/predict")
            .set_json(json!({ "picture": "data:image/png;base64,AAAA" }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("invalid request body"));
    }

    #[actix_web::test]
    async fn large_canvas_under_the_limit_is_accepted() {
        // Padding is trimmed before base64 decoding, so the image stays valid
        let url = data_url(&DynamicImage::ImageLuma8(seven(280)));
        let padded = format!("{url}{}", " ".repeat(3 * 1024 * 1024));
        let (status, kind, body) = post_image(StubClassifier::confident(7, 0.9), &padded).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(kind, None);
        assert_eq!(body, json!({ "predicted_number": 7, "score": 0.9 }));
    }

    #[actix_web::test]
    async fn body_over_the_limit_is_rejected() {
        let limit = 64 * 1024;
        let app = test::init_service(
            App::new()
                .app_data(state(StubClassifier::confident(7, 0.9)))
                .configure(|cfg| crate::server::configure(cfg, limit)),
        )
        .await;
        let image = format!("data:image/png;base64,{}", "A".repeat(2 * limit));
        let req = test::TestRequest::post()
            .uri("/api/predict")
            .set_json(json!({ "image": image }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("invalid request body"));
    }

    #[actix_web::test]
    async fn health_reports_model_kind() {
        let app = test::init_service(
            App::new()
                .app_data(state(StubClassifier::confident(0, 0.9)))
                .configure(|cfg| crate::server::configure(cfg, JSON_LIMIT)),
        )
        .await;
        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: HealthResponse = test::call_and_read_body_json(&app, req).await;

        assert_eq!(
            body,
            HealthResponse {
                status: "ok".into(),
                model: "stub".into()
            }
        );
    }

    #[actix_web::test]
    async fn front_end_is_served_when_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html>digits</html>").unwrap();
        std::fs::create_dir(dir.path().join("static")).unwrap();
        std::fs::write(dir.path().join("static").join("app.js"), "let x = 1;").unwrap();

        let static_dir = dir.path().to_path_buf();
        let app = test::init_service(
            App::new().configure(|cfg| crate::server::configure_static(cfg, &static_dir)),
        )
        .await;

        let req = test::TestRequest::get().uri("/").to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(body, "<html>digits</html>".as_bytes());

        let req = test::TestRequest::get().uri("/static/app.js").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
