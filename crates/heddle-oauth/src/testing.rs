//! Shared fixtures for unit tests: a scripted HTTP client and a conforming
//! authorization server metadata document.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use heddle_common::HttpClient;
use http::{Request, Response};
use thiserror::Error;

use crate::config::ClientConfig;
use crate::keyset::Keyset;
use crate::types::AuthServerMetadata;

#[derive(Debug, Error)]
#[error("no fixture response for {0}")]
pub(crate) struct NoRoute(String);

#[derive(Clone, Debug)]
pub(crate) struct CannedResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl CannedResponse {
    pub fn json(body: &str) -> Self {
        Self {
            status: 200,
            headers: vec![("Content-Type", "application/json".into())],
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

/// HTTP client over canned responses, keyed by full request URI. Each URI
/// holds a queue; the final entry repeats once the queue drains, so routes
/// that are fetched more than once only need scripting when the answer
/// changes between calls.
#[derive(Default)]
pub(crate) struct FixtureHttp {
    routes: Mutex<HashMap<String, VecDeque<CannedResponse>>>,
    pub requests: Mutex<Vec<CapturedRequest>>,
}

#[derive(Clone, Debug)]
pub(crate) struct CapturedRequest {
    pub method: String,
    pub uri: String,
    pub headers: http::HeaderMap,
    pub body: Vec<u8>,
}

impl FixtureHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, uri: &str, response: CannedResponse) {
        self.routes
            .get_mut()
            .unwrap()
            .entry(uri.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn json(&mut self, uri: &str, body: &str) {
        self.push(uri, CannedResponse::json(body));
    }

    pub fn status(&mut self, uri: &str, status: u16) {
        self.push(uri, CannedResponse::status(status));
    }

    pub fn captured(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl HttpClient for FixtureHttp {
    type Error = NoRoute;

    async fn send_http(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, Self::Error> {
        let uri = request.uri().to_string();
        self.requests.lock().unwrap().push(CapturedRequest {
            method: request.method().to_string(),
            uri: uri.clone(),
            headers: request.headers().clone(),
            body: request.body().clone(),
        });

        let mut routes = self.routes.lock().unwrap();
        let queue = routes.get_mut(&uri).ok_or_else(|| NoRoute(uri.clone()))?;
        let canned = if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().ok_or_else(|| NoRoute(uri))?
        };

        let mut builder = Response::builder().status(canned.status);
        for (name, value) in &canned.headers {
            builder = builder.header(*name, value);
        }
        Ok(builder.body(canned.body).unwrap())
    }
}

/// Metadata document that passes [`AuthServerMetadata::validate`].
pub(crate) fn valid_metadata(issuer: &str) -> AuthServerMetadata {
    AuthServerMetadata {
        issuer: issuer.into(),
        authorization_endpoint: format!("{issuer}/oauth/authorize"),
        token_endpoint: format!("{issuer}/oauth/token"),
        response_types_supported: vec!["code".into()],
        grant_types_supported: vec!["authorization_code".into(), "refresh_token".into()],
        code_challenge_methods_supported: vec!["S256".into()],
        token_endpoint_auth_methods_supported: vec!["none".into(), "private_key_jwt".into()],
        token_endpoint_auth_signing_alg_values_supported: vec!["ES256".into()],
        dpop_signing_alg_values_supported: vec!["ES256".into()],
        scopes_supported: vec!["atproto".into(), "transition:generic".into()],
        pushed_authorization_request_endpoint: Some(format!("{issuer}/oauth/par")),
        require_pushed_authorization_requests: Some(true),
        authorization_response_iss_parameter_supported: Some(true),
        client_id_metadata_document_supported: Some(true),
        require_request_uri_registration: None,
        revocation_endpoint: None,
    }
}

/// Client configuration rooted at `https://app.example/` with a throwaway
/// signing key.
pub(crate) fn test_config() -> ClientConfig {
    let app = url::Url::parse("https://app.example/").unwrap();
    ClientConfig::for_app_url(&app, Keyset::generate("test-kid")).unwrap()
}

/// Decodes the claims segment of the DPoP proof attached to a captured
/// request.
pub(crate) fn dpop_claims(request: &CapturedRequest) -> serde_json::Value {
    let proof = request
        .headers
        .get("DPoP")
        .and_then(|v| v.to_str().ok())
        .expect("request carries a DPoP proof");
    let payload = proof.split('.').nth(1).expect("compact JWS");
    serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap()
}
