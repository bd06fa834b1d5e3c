//! HTTP route handlers for avtaler
//!
//! - `/internal/*`: liveness and readiness checks, version and template upload
//! - `/api/avtale*`: the agreement API for logged in users

pub mod avtale;
pub mod avtalemal;
pub mod health;

pub use avtale::handle_avtale_request;
pub use avtalemal::{handle_avtalemal_upload, parse_upload, UploadPart};
pub use health::{is_alive, is_ready, version_info};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::types::AvtaleError;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Largest JSON request body accepted
const MAX_JSON_BODY: usize = 10 * 1024;

pub(crate) fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub(crate) fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Cache-Control", "no-store")
        .body(full_body(json))
        .unwrap()
}

pub(crate) fn error_response(err: AvtaleError) -> Response<BoxBody> {
    let (status, body) = err.into_status_code_and_body();
    json_response(status, &body)
}

pub(crate) fn not_found_response(path: &str) -> Response<BoxBody> {
    json_response(
        StatusCode::NOT_FOUND,
        &serde_json::json!({ "error": "not_found", "path": path }),
    )
}

pub(crate) fn get_auth_header<B>(req: &Request<B>) -> Option<&str> {
    req.headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

pub(crate) async fn parse_json_body<T, B>(req: Request<B>) -> Result<T, AvtaleError>
where
    T: for<'de> Deserialize<'de>,
    B: Body,
    B::Error: std::fmt::Display,
{
    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|e| AvtaleError::BadRequest(format!("Failed to read body: {}", e)))?;

    let bytes = body.to_bytes();
    if bytes.len() > MAX_JSON_BODY {
        return Err(AvtaleError::BadRequest("Request body too large".into()));
    }

    serde_json::from_slice(&bytes)
        .map_err(|e| AvtaleError::BadRequest(format!("Invalid JSON: {}", e)))
}
