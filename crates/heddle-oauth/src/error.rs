use heddle_identity::{Did, IdentityError};
use http::StatusCode;
use miette::Diagnostic;
use smol_str::SmolStr;
use thiserror::Error;

use crate::dpop::DpopError;
use crate::keyset::KeysetError;
use crate::store::StoreError;

/// Errors produced while driving the OAuth flow against an authorization
/// server or a PDS.
#[derive(Debug, Error, Diagnostic)]
pub enum OAuthError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Identity(#[from] IdentityError),

    #[error("refusing to fetch unsafe url: {0}")]
    #[diagnostic(
        code(heddle::oauth::unsafe_url),
        help("only public https hostnames without ports or userinfo are fetched")
    )]
    UnsafeUrl(String),

    #[error("authorization server metadata failed validation: {0}")]
    #[diagnostic(code(heddle::oauth::invalid_server_metadata))]
    InvalidServerMetadata(String),

    #[error("no pending authorization request for state {0}")]
    #[diagnostic(
        code(heddle::oauth::replay),
        help("each state value is accepted exactly once; this callback may be a replay")
    )]
    Replay(SmolStr),

    #[error("issuer mismatch: expected {expected}, callback claimed {got}")]
    #[diagnostic(code(heddle::oauth::issuer_mismatch))]
    IssuerMismatch { expected: String, got: String },

    #[error("token issued for {got}, but the flow started for {expected}")]
    #[diagnostic(code(heddle::oauth::token_subject_mismatch))]
    TokenSubjectMismatch { expected: Did, got: String },

    #[error("server granted scope {granted:?}, requested {requested}")]
    #[diagnostic(code(heddle::oauth::scope_mismatch))]
    ScopeMismatch {
        requested: SmolStr,
        granted: Option<SmolStr>,
    },

    #[error("server demanded a fresh DPoP nonce after the retry")]
    #[diagnostic(
        code(heddle::oauth::nonce_retry_exhausted),
        help("a request is retried at most once per use_dpop_nonce signal")
    )]
    NonceRetryExhausted,

    #[error("upstream returned {status}")]
    #[diagnostic(code(heddle::oauth::upstream_http))]
    UpstreamHttp {
        status: StatusCode,
        body: Option<serde_json::Value>,
    },

    #[error("invalid callback parameters: {0}")]
    #[diagnostic(code(heddle::oauth::callback))]
    Callback(String),

    #[error("session for {0} has no refresh token")]
    #[diagnostic(code(heddle::oauth::no_refresh_token))]
    NoRefreshToken(Did),

    #[error("no session stored for {0}")]
    #[diagnostic(code(heddle::oauth::session_not_found))]
    SessionNotFound(Did),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Dpop(#[from] DpopError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Keyset(#[from] KeysetError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error("http transport error: {0}")]
    #[diagnostic(code(heddle::oauth::transport))]
    Transport(Box<dyn std::error::Error + Send + Sync + 'static>),

    #[error("serde error: {0}")]
    #[diagnostic(code(heddle::oauth::serde))]
    Serde(#[from] serde_json::Error),

    #[error("form encoding error: {0}")]
    #[diagnostic(code(heddle::oauth::form))]
    Form(#[from] serde_html_form::ser::Error),

    #[error("http error: {0}")]
    #[diagnostic(code(heddle::oauth::http))]
    Http(#[from] http::Error),

    #[error("url parse error: {0}")]
    #[diagnostic(code(heddle::oauth::url))]
    Url(#[from] url::ParseError),
}

impl OAuthError {
    pub fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(err))
    }
}

pub type Result<T, E = OAuthError> = core::result::Result<T, E>;
