//! The resolution seam: error taxonomy, the verified-identity triple, and the
//! traits the OAuth engine plugs into.

use std::future::Future;

use http::StatusCode;
use miette::Diagnostic;
use thiserror::Error;

use crate::types::{Did, DidDocument, Handle};

/// Errors that can occur during identity resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum IdentityError {
    #[error("invalid DID: {0}")]
    #[diagnostic(
        code(heddle_identity::invalid_did),
        help("ensure DID is correctly formed (e.g. did:plc:abc123)")
    )]
    InvalidDid(String),
    #[error("invalid handle: {0}")]
    #[diagnostic(
        code(heddle_identity::invalid_handle),
        help("handles are domain-name shaped, e.g. alice.bsky.social")
    )]
    InvalidHandle(String),
    #[error("input is neither a handle nor a DID: {0}")]
    #[diagnostic(code(heddle_identity::invalid_identifier))]
    InvalidIdentifier(String),
    #[error("unsupported DID method: {0}")]
    #[diagnostic(
        code(heddle_identity::unsupported_method),
        help("supported DID methods: did:plc, did:web")
    )]
    UnsupportedMethod(String),
    #[error("handle not found: {0}")]
    #[diagnostic(code(heddle_identity::handle_not_found))]
    HandleNotFound(Handle),
    #[error("DID not found: {0}")]
    #[diagnostic(code(heddle_identity::did_not_found))]
    DidNotFound(Did),
    #[error("handle {input} resolves to {did}, but that DID declares handle {declared:?}")]
    #[diagnostic(
        code(heddle_identity::handle_mismatch),
        help("bidirectional verification failed; do not trust either direction")
    )]
    HandleMismatch {
        input: Handle,
        did: Did,
        declared: Option<Handle>,
    },
    #[error("DID {input} declares handle {handle}, which resolves back to {resolved}")]
    #[diagnostic(
        code(heddle_identity::did_mismatch),
        help("bidirectional verification failed; do not trust either direction")
    )]
    DidMismatch {
        input: Did,
        handle: Handle,
        resolved: Did,
    },
    #[error("DID document for {0} declares no at:// handle alias")]
    #[diagnostic(code(heddle_identity::no_declared_handle))]
    NoDeclaredHandle(Did),
    #[error("DID document id {found} does not match requested DID {expected}")]
    #[diagnostic(
        code(heddle_identity::doc_id_mismatch),
        help("document id differs from the requested DID; do not trust this document")
    )]
    DocIdMismatch { expected: Did, found: Did },
    #[error("no #atproto_pds service endpoint in DID document")]
    #[diagnostic(code(heddle_identity::endpoint_not_found))]
    EndpointNotFound,
    #[error("refusing unsafe url: {0}")]
    #[diagnostic(
        code(heddle_identity::unsafe_url),
        help("identity data pointed resolution at a non-public host")
    )]
    UnsafeUrl(String),
    #[error("unexpected HTTP status {0}")]
    #[diagnostic(code(heddle_identity::http_status))]
    HttpStatus(StatusCode),
    #[error("transport error: {0}")]
    #[diagnostic(code(heddle_identity::transport))]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
    #[error("DNS error: {0}")]
    #[diagnostic(code(heddle_identity::dns))]
    Dns(String),
    #[error(transparent)]
    #[diagnostic(code(heddle_identity::serde))]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, IdentityError>;

/// A fully verified identity: the handle resolved to the DID, and the DID
/// document declared the handle back. Neither half is trusted alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub did: Did,
    pub handle: Handle,
    pub doc: DidDocument,
}

impl ResolvedIdentity {
    pub fn pds_url(&self) -> Result<url::Url> {
        self.doc.pds_endpoint()
    }
}

/// DNS TXT lookup seam, so tests can substitute fixtures for hickory.
pub trait DnsTxtResolver {
    /// Return the TXT record strings for `name`, or an empty vec when the
    /// name does not exist.
    fn lookup_txt(&self, name: &str) -> impl Future<Output = Result<Vec<String>>> + Send;
}

/// No DNS available: every lookup yields nothing, so handle resolution falls
/// through to the HTTPS well-known path.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDnsTxt;

impl DnsTxtResolver for NoDnsTxt {
    async fn lookup_txt(&self, _name: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Resolution entry point used by the OAuth flow.
pub trait ResolveIdentity {
    /// Resolve a handle or DID to a verified (DID, handle, document) triple.
    fn resolve_identity(
        &self,
        input: &str,
    ) -> impl Future<Output = Result<ResolvedIdentity>> + Send;
}
