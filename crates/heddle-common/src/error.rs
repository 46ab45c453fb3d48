use miette::Diagnostic;
use thiserror::Error;

/// Errors produced at the transport boundary.
#[derive(Debug, Error, Diagnostic)]
pub enum TransportError {
    /// The request could not be constructed
    #[error("invalid request: {0}")]
    #[diagnostic(code(heddle_common::invalid_request))]
    InvalidRequest(String),
    /// A URL failed the outbound safety filter
    #[error("unsafe url refused: {0}")]
    #[diagnostic(
        code(heddle_common::unsafe_url),
        help("outbound targets must be plain public https hostnames")
    )]
    UnsafeUrl(String),
    /// The underlying client failed
    #[error(transparent)]
    #[diagnostic(code(heddle_common::transport))]
    Other(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}
