//! Form-encoded POST requests to the authorization server: pushed
//! authorization requests (RFC 9126), the code exchange, and refresh grants.
//! Every request authenticates with a `private_key_jwt` client assertion and
//! carries a DPoP proof.

use heddle_common::{HttpClient, is_safe_url};
use http::{Method, Request, Response, StatusCode};
use jose_jwk::Key;
use serde::Serialize;
use smol_str::SmolStr;
use url::Url;

use crate::config::ClientConfig;
use crate::dpop::{is_use_dpop_nonce_error, send_with_dpop};
use crate::error::OAuthError;
use crate::keyset::CLIENT_ASSERTION_TYPE_JWT_BEARER;
use crate::resolver::fetch_authserver_meta;
use crate::session::{AuthRequest, Session};
use crate::types::{
    AuthServerMetadata, CodeChallengeMethod, CodeGrantParameters, GrantType, ParParameters,
    ParResponse, RefreshGrantParameters, ResponseType, TokenResponse,
};
use crate::utils::{generate_dpop_key, generate_nonce, generate_pkce};

/// Everything produced by a successful PAR that the callback will need
/// later. Persist it keyed by `state` before redirecting the user.
#[derive(Debug)]
pub struct ParOutcome {
    pub request_uri: String,
    pub expires_in: Option<i64>,
    pub state: SmolStr,
    pub pkce_verifier: SmolStr,
    pub dpop_key: Key,
    pub dpop_authserver_nonce: Option<SmolStr>,
}

#[derive(Debug, Serialize)]
struct RequestPayload<T>
where
    T: Serialize,
{
    client_id: String,
    client_assertion_type: &'static str,
    client_assertion: String,
    #[serde(flatten)]
    parameters: T,
}

/// Pushes an authorization request (RFC 9126 §2). Generates the per-login
/// DPoP key, state, and PKCE verifier; the first attempt goes out without a
/// nonce and the `use_dpop_nonce` answer is absorbed by the retry.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(level = "debug", skip_all, fields(issuer = %metadata.issuer))
)]
pub async fn send_par_request<C>(
    client: &C,
    metadata: &AuthServerMetadata,
    config: &ClientConfig,
    login_hint: Option<&str>,
) -> Result<ParOutcome, OAuthError>
where
    C: HttpClient + Sync,
{
    let state = generate_nonce();
    let (code_challenge, pkce_verifier) = generate_pkce();
    let dpop_key = generate_dpop_key(metadata)?;

    // validate() guarantees the endpoint is present
    let endpoint = metadata
        .pushed_authorization_request_endpoint
        .as_deref()
        .ok_or_else(|| {
            OAuthError::InvalidServerMetadata("missing PAR endpoint".into())
        })?;
    let parameters = ParParameters {
        response_type: ResponseType::Code,
        redirect_uri: config.redirect_uri.clone(),
        state: state.clone(),
        scope: config.scope.clone(),
        code_challenge,
        code_challenge_method: CodeChallengeMethod::S256,
        login_hint: login_hint.map(SmolStr::new),
    };

    let mut nonce = None;
    let response = oauth_form_post(
        client,
        endpoint,
        &metadata.issuer,
        config,
        parameters,
        &dpop_key,
        &mut nonce,
    )
    .await?;
    // oauth-provider returns 201, RFC 9126 says 200; accept both
    if response.status() != StatusCode::CREATED && response.status() != StatusCode::OK {
        return Err(classify_failure(&response));
    }
    let par: ParResponse = serde_json::from_slice(response.body())?;
    Ok(ParOutcome {
        request_uri: par.request_uri,
        expires_in: par.expires_in,
        state,
        pkce_verifier,
        dpop_key,
        dpop_authserver_nonce: nonce,
    })
}

/// Exchanges the authorization code for tokens. The server metadata is
/// re-fetched and re-validated rather than trusted from the pending request.
/// Returns the token response and the latest authorization server nonce.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(level = "debug", skip_all, fields(issuer = %request.authserver_iss))
)]
pub async fn initial_token_request<C>(
    client: &C,
    request: &AuthRequest,
    code: &str,
    config: &ClientConfig,
) -> Result<(TokenResponse, Option<SmolStr>), OAuthError>
where
    C: HttpClient + Sync,
{
    let issuer = Url::parse(&request.authserver_iss)?;
    let metadata = fetch_authserver_meta(client, &issuer).await?;
    let parameters = CodeGrantParameters {
        grant_type: GrantType::AuthorizationCode,
        code: code.into(),
        redirect_uri: config.redirect_uri.clone(),
        code_verifier: request.pkce_verifier.clone(),
    };
    let mut nonce = request.dpop_authserver_nonce.clone();
    let response = oauth_form_post(
        client,
        &metadata.token_endpoint,
        &metadata.issuer,
        config,
        parameters,
        &request.dpop_key,
        &mut nonce,
    )
    .await?;
    if response.status() != StatusCode::OK {
        return Err(classify_failure(&response));
    }
    Ok((serde_json::from_slice(response.body())?, nonce))
}

/// Requests fresh tokens with the session's refresh token (RFC 6749 §6).
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(level = "debug", skip_all, fields(did = %session.did))
)]
pub async fn refresh_token_request<C>(
    client: &C,
    session: &Session,
    config: &ClientConfig,
) -> Result<(TokenResponse, Option<SmolStr>), OAuthError>
where
    C: HttpClient + Sync,
{
    let refresh_token = session
        .refresh_token
        .clone()
        .ok_or_else(|| OAuthError::NoRefreshToken(session.did.clone()))?;
    let issuer = Url::parse(&session.authserver_iss)?;
    let metadata = fetch_authserver_meta(client, &issuer).await?;
    let parameters = RefreshGrantParameters {
        grant_type: GrantType::RefreshToken,
        refresh_token,
    };
    let mut nonce = session.dpop_authserver_nonce.clone();
    let response = oauth_form_post(
        client,
        &metadata.token_endpoint,
        &metadata.issuer,
        config,
        parameters,
        &session.dpop_key,
        &mut nonce,
    )
    .await?;
    if response.status() != StatusCode::OK {
        return Err(classify_failure(&response));
    }
    Ok((serde_json::from_slice(response.body())?, nonce))
}

async fn oauth_form_post<C, T>(
    client: &C,
    endpoint: &str,
    issuer: &str,
    config: &ClientConfig,
    parameters: T,
    dpop_key: &Key,
    nonce: &mut Option<SmolStr>,
) -> Result<Response<Vec<u8>>, OAuthError>
where
    C: HttpClient + Sync,
    T: Serialize,
{
    if !is_safe_url(endpoint) {
        return Err(OAuthError::UnsafeUrl(endpoint.to_string()));
    }
    let assertion = config
        .keyset
        .create_client_assertion(config.client_id.as_str(), issuer)?;
    let body = serde_html_form::to_string(RequestPayload {
        client_id: config.client_id.to_string(),
        client_assertion_type: CLIENT_ASSERTION_TYPE_JWT_BEARER,
        client_assertion: assertion,
        parameters,
    })?;
    let request = Request::builder()
        .uri(endpoint)
        .method(Method::POST)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(body.into_bytes())?;
    send_with_dpop(client, dpop_key, nonce, true, request).await
}

/// A non-success response after the bounded retry. A lingering
/// `use_dpop_nonce` demand means the retry protocol failed; anything else is
/// reported with whatever JSON body came back.
fn classify_failure(response: &Response<Vec<u8>>) -> OAuthError {
    if is_use_dpop_nonce_error(true, response) {
        return OAuthError::NonceRetryExhausted;
    }
    OAuthError::UpstreamHttp {
        status: response.status(),
        body: serde_json::from_slice(response.body()).ok(),
    }
}
