//! Template upload
//!
//! `POST /internal/avtalemal` by an authenticated caller, with a
//! `multipart/form-data` body:
//! - `file`: the PDF
//! - `metadata`: JSON `{ "versjon": "..." }`
//!
//! The body is parsed once into [`UploadPart`]s; the handler then works on
//! the parsed parts only.

use bytes::Bytes;
use futures_util::Stream;
use http_body_util::BodyExt;
use hyper::body::Body;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

use super::{error_response, get_auth_header, json_response, BoxBody};
use crate::logging::{AuditEvent, AuditEventType};
use crate::server::AppState;
use crate::types::{AvtaleError, Result};

/// Largest template accepted
const MAX_TEMPLATE_BYTES: u64 = 20 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadMetadata {
    pub versjon: String,
}

/// One multipart field, classified by name
#[derive(Debug, Clone, PartialEq)]
pub enum UploadPart {
    File {
        filename: Option<String>,
        bytes: Bytes,
    },
    Metadata(UploadMetadata),
    Unknown {
        name: Option<String>,
    },
}

/// Parse a multipart body into classified parts
pub async fn parse_upload<S, E>(stream: S, boundary: &str) -> Result<Vec<UploadPart>>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
{
    let constraints = multer::Constraints::new()
        .size_limit(multer::SizeLimit::new().whole_stream(MAX_TEMPLATE_BYTES + 64 * 1024));
    let mut multipart = multer::Multipart::with_constraints(stream, boundary, constraints);
    let mut parts = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AvtaleError::BadRequest(format!("multipart: {e}")))?
    {
        let name = field.name().map(str::to_string);
        let part = match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AvtaleError::BadRequest(format!("file part: {e}")))?;
                UploadPart::File { filename, bytes }
            }
            Some("metadata") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AvtaleError::BadRequest(format!("metadata part: {e}")))?;
                UploadPart::Metadata(serde_json::from_slice(&bytes)?)
            }
            _ => UploadPart::Unknown { name: name.clone() },
        };
        parts.push(part);
    }

    Ok(parts)
}

/// Collapse parsed parts into the template and its version
fn template_from_parts(parts: Vec<UploadPart>) -> Result<(Bytes, String)> {
    let mut file = None;
    let mut versjon = None;

    for part in parts {
        match part {
            UploadPart::File { bytes, filename } => {
                debug!(filename = ?filename, size = bytes.len(), "Template file part");
                file = Some(bytes);
            }
            UploadPart::Metadata(metadata) => versjon = Some(metadata.versjon),
            UploadPart::Unknown { name } => debug!(field = ?name, "Ignoring unknown multipart field"),
        }
    }

    let file = file.ok_or_else(|| AvtaleError::BadRequest("missing 'file' part".into()))?;
    let versjon = versjon.ok_or_else(|| AvtaleError::BadRequest("missing 'metadata' part".into()))?;
    if !file.starts_with(b"%PDF") {
        return Err(AvtaleError::BadRequest("template is not a PDF".into()));
    }
    Ok((file, versjon))
}

pub async fn handle_avtalemal_upload<B>(req: Request<B>, state: Arc<AppState>) -> Response<BoxBody>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
{
    match upload(req, &state).await {
        Ok(versjon) => json_response(StatusCode::CREATED, &serde_json::json!({ "versjon": versjon })),
        Err(e) => error_response(e),
    }
}

async fn upload<B>(req: Request<B>, state: &AppState) -> Result<String>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
{
    let innlogget = state.validator.authenticate(get_auth_header(&req)).await?;

    let boundary = req
        .headers()
        .get(hyper::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| multer::parse_boundary(ct).ok())
        .ok_or_else(|| AvtaleError::BadRequest("expected multipart/form-data".into()))?;

    let stream = req.into_body().into_data_stream();
    let parts = parse_upload(stream, &boundary).await?;
    let (file, versjon) = template_from_parts(parts)?;

    state.service.documents().publish(file, &versjon).await?;
    info!(versjon = %versjon, "Agreement template uploaded");
    AuditEvent::new(AuditEventType::TemplatePublished)
        .with_subject(&innlogget.fnr)
        .emit();
    Ok(versjon)
}
