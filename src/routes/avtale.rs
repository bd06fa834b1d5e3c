//! Agreement API
//!
//! Every route authenticates the caller first. Routes:
//! - `GET  /api/avtale`: municipalities the caller may sign for
//! - `GET  /api/avtale/{orgnr}`: one of them
//! - `POST /api/avtale/signer`: start signing, returns the Digipost redirect
//! - `POST /api/avtale/signert`: reconcile after Digipost's callback
//! - `GET  /api/avtale/{orgnr}/dokument`: the archived signed PDF

use hyper::body::Body;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::{error_response, full_body, get_auth_header, json_response, not_found_response, parse_json_body, BoxBody};
use crate::auth::Innlogget;
use crate::server::AppState;
use crate::types::{AvtaleError, Result};

const PDF_CONTENT_TYPE: &str = "application/pdf";

#[derive(Debug, Deserialize)]
struct SignerRequest {
    orgnr: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignerResponse {
    redirect_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignertRequest {
    orgnr: String,
    status_query_token: String,
}

fn validate_orgnr(orgnr: &str) -> Result<()> {
    if orgnr.len() == 9 && orgnr.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(AvtaleError::BadRequest(format!("invalid organization number '{orgnr}'")))
    }
}

/// Route a request under `/api/avtale`
pub async fn handle_avtale_request<B>(req: Request<B>, state: Arc<AppState>) -> Response<BoxBody>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let innlogget = match state.validator.authenticate(get_auth_header(&req)).await {
        Ok(innlogget) => innlogget,
        Err(e) => return error_response(e),
    };

    let method = req.method().clone();
    let path = req.uri().path().trim_end_matches('/').to_string();
    let segments: Vec<&str> = path
        .trim_start_matches("/api/avtale")
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    let result = match (method, segments.as_slice()) {
        (Method::GET, []) => list_kommuner(&state, &innlogget).await,
        (Method::POST, ["signer"]) => signer(req, &state, &innlogget).await,
        (Method::POST, ["signert"]) => signert(req, &state, &innlogget).await,
        (Method::GET, [orgnr]) => get_kommune(&state, &innlogget, orgnr).await,
        (Method::GET, [orgnr, "dokument"]) => dokument(&state, &innlogget, orgnr).await,
        _ => return not_found_response(&path),
    };

    result.unwrap_or_else(error_response)
}

async fn list_kommuner(state: &AppState, innlogget: &Innlogget) -> Result<Response<BoxBody>> {
    let kommuner = state.service.kommuner(innlogget).await?;
    Ok(json_response(StatusCode::OK, &kommuner))
}

async fn get_kommune(state: &AppState, innlogget: &Innlogget, orgnr: &str) -> Result<Response<BoxBody>> {
    validate_orgnr(orgnr)?;
    let kommune = state.service.kommune(innlogget, orgnr).await?;
    Ok(json_response(StatusCode::OK, &kommune))
}

async fn signer<B>(req: Request<B>, state: &AppState, innlogget: &Innlogget) -> Result<Response<BoxBody>>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let body: SignerRequest = parse_json_body(req).await?;
    validate_orgnr(&body.orgnr)?;

    let redirect_url = state.service.create_agreement(innlogget, &body.orgnr).await?;
    Ok(json_response(StatusCode::OK, &SignerResponse { redirect_url }))
}

async fn signert<B>(req: Request<B>, state: &AppState, innlogget: &Innlogget) -> Result<Response<BoxBody>>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let body: SignertRequest = parse_json_body(req).await?;
    validate_orgnr(&body.orgnr)?;
    if body.status_query_token.is_empty() {
        return Err(AvtaleError::BadRequest("statusQueryToken is empty".into()));
    }

    state.service.require_signing_right(innlogget, &body.orgnr).await?;

    match state
        .service
        .reconcile_completion(&body.orgnr, &body.status_query_token)
        .await?
    {
        Some(avtale) => Ok(json_response(StatusCode::OK, &avtale)),
        None => {
            debug!(orgnr = %body.orgnr, "Signing not completed yet");
            Ok(json_response(
                StatusCode::ACCEPTED,
                &serde_json::json!({ "status": "PENDING" }),
            ))
        }
    }
}

async fn dokument(state: &AppState, innlogget: &Innlogget, orgnr: &str) -> Result<Response<BoxBody>> {
    validate_orgnr(orgnr)?;
    let object = state.service.signed_document(innlogget, orgnr).await?;

    let filename = download_filename(&object.name);
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", PDF_CONTENT_TYPE)
        .header(
            "Content-Disposition",
            format!("attachment; filename=\"{filename}\""),
        )
        .header("Cache-Control", "no-store")
        .body(full_body(object.bytes))
        .unwrap())
}

/// Last path segment of an archived object, reduced to characters that are
/// valid inside a quoted header parameter
fn download_filename(object_name: &str) -> String {
    let name: String = object_name
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    if name.is_empty() {
        "avtale.pdf".to_string()
    } else {
        name
    }
}
