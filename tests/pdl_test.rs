//! PDL name lookup against a mocked GraphQL endpoint.

mod common;

use std::sync::Arc;

use avtaler::auth::PassthroughTokenBroker;
use avtaler::services::{PdlClient, PdlConfig, PersonRegistry};
use avtaler::types::AvtaleError;
use common::{innlogget, SIGNER_FNR};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> PdlClient {
    PdlClient::new(
        PdlConfig {
            url: format!("{}/graphql", server.uri()),
            audience: "dev-fss:pdl:pdl-api".into(),
            behandlingsnummer: Some("B123".into()),
        },
        reqwest::Client::new(),
        Arc::new(PassthroughTokenBroker::new("service-token")),
    )
}

#[tokio::test]
async fn test_full_name_with_middle_name() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", "Bearer caller-token"))
        .and(header("Behandlingsnummer", "B123"))
        .and(body_partial_json(serde_json::json!({ "variables": { "ident": SIGNER_FNR } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {
                "hentPerson": {
                    "navn": [{ "fornavn": "Ola", "mellomnavn": "Johan", "etternavn": "Nordmann" }]
                }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let navn = client(&server).full_name(&innlogget()).await.unwrap();

    assert_eq!(navn, "Ola Johan Nordmann");
}

#[tokio::test]
async fn test_graphql_error_is_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": { "hentPerson": null },
            "errors": [{ "message": "Fant ikke person" }]
        })))
        .mount(&server)
        .await;

    let result = client(&server).full_name(&innlogget()).await;

    assert!(matches!(result, Err(AvtaleError::Upstream(msg)) if msg.contains("Fant ikke person")));
}

#[tokio::test]
async fn test_missing_name_is_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": { "hentPerson": { "navn": [] } }
        })))
        .mount(&server)
        .await;

    let result = client(&server).full_name(&innlogget()).await;

    assert!(matches!(result, Err(AvtaleError::Upstream(_))));
}
