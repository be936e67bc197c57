//! The user-facing JSON web server

use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use anyhow::anyhow;
use std::collections::HashMap;
use std::path::Path;

pub mod protocol;
pub mod routes;

/// A request the framework itself refused, before it reached the
/// prediction service
#[derive(Debug)]
pub struct WebError {
    err: anyhow::Error,
}

impl std::fmt::Display for WebError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.err)
    }
}

impl actix_web::error::ResponseError for WebError {
    fn error_response(&self) -> HttpResponse {
        let err = HashMap::from([("error", self.to_string())]);

        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .json(err)
    }

    fn status_code(&self) -> StatusCode {
        StatusCode::UNPROCESSABLE_ENTITY
    }
}

impl From<anyhow::Error> for WebError {
    fn from(err: anyhow::Error) -> WebError {
        WebError { err }
    }
}

impl From<actix_web::error::JsonPayloadError> for WebError {
    fn from(err: actix_web::error::JsonPayloadError) -> Self {
        WebError {
            err: anyhow!("invalid request body: {err}"),
        }
    }
}

/// Register the API routes. `json_limit` caps the request body in bytes
pub fn configure(cfg: &mut web::ServiceConfig, json_limit: usize) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(json_limit)
            .error_handler(|err, _req| WebError::from(err).into()),
    )
    .service(routes::predict)
    .service(routes::health);
}

/// Serve the front end bundle from `static_dir` if it has been built
pub fn configure_static(cfg: &mut web::ServiceConfig, static_dir: &Path) {
    if !static_dir.join("index.html").is_file() {
        tracing::warn!(
            "no front end found in {}, serving the API only",
            static_dir.display()
        );
        return;
    }
    cfg.app_data(web::Data::new(routes::StaticDir(static_dir.to_path_buf())))
        .service(actix_files::Files::new("/static", static_dir.join("static")))
        .service(routes::index);
}
