//! Identity resolution for the AT Protocol, verified in both directions.
//!
//! Handle → DID goes through DNS TXT (`_atproto.<handle>`) first, then the
//! HTTPS well-known document. DID → document goes through `plc.directory` for
//! `did:plc` and the well-known `did.json` for `did:web`. In either direction
//! the other direction is re-derived and compared before anything is trusted:
//! a handle is only as good as the DID document that declares it, and vice
//! versa. Mismatches fail closed.
//!
//! Every fetch target is attacker-influenced (handles are user input, service
//! endpoints come from fetched documents), so each URL passes the safety
//! filter before a request is issued.

pub mod resolver;
pub mod types;

use heddle_common::{HttpClient, is_safe_url};
use http::StatusCode;
use percent_encoding::percent_decode_str;

pub use crate::resolver::{
    DnsTxtResolver, IdentityError, NoDnsTxt, ResolveIdentity, ResolvedIdentity,
};
pub use crate::types::{Did, DidDocument, Handle, Service};

use crate::resolver::Result;

const DEFAULT_PLC_DIRECTORY: &str = "https://plc.directory";

/// The concrete resolver: an HTTP client plus an optional DNS TXT source.
#[derive(Debug, Clone)]
pub struct IdentityResolver<C, D = NoDnsTxt> {
    http: C,
    dns: D,
    plc_directory: String,
}

impl<C> IdentityResolver<C, NoDnsTxt> {
    /// Resolver without DNS; handle resolution uses only the well-known path.
    pub fn new(http: C) -> Self {
        Self::with_dns(http, NoDnsTxt)
    }
}

impl<C, D> IdentityResolver<C, D> {
    pub fn with_dns(http: C, dns: D) -> Self {
        Self {
            http,
            dns,
            plc_directory: DEFAULT_PLC_DIRECTORY.into(),
        }
    }

    /// Override the PLC directory base URL.
    pub fn with_plc_directory(mut self, base: impl Into<String>) -> Self {
        let base = base.into();
        self.plc_directory = base.trim_end_matches('/').to_string();
        self
    }
}

impl<C, D> IdentityResolver<C, D>
where
    C: HttpClient + Sync,
    D: DnsTxtResolver + Sync,
{
    /// Resolve a handle to a DID: DNS TXT first, then HTTPS well-known.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self), fields(handle = %handle)))]
    pub async fn resolve_handle(&self, handle: &Handle) -> Result<Did> {
        if let Ok(records) = self.dns.lookup_txt(&format!("_atproto.{handle}")).await {
            for record in records {
                if let Some(value) = record.strip_prefix("did=") {
                    if let Ok(did) = Did::new(value) {
                        return Ok(did);
                    }
                }
            }
        }

        let url = format!("https://{handle}/.well-known/atproto-did");
        let res = self.get(&url).await?;
        if res.status() != StatusCode::OK {
            return Err(IdentityError::HandleNotFound(handle.clone()));
        }
        let body = String::from_utf8_lossy(res.body()).into_owned();
        let token = body
            .split_whitespace()
            .next()
            .ok_or_else(|| IdentityError::HandleNotFound(handle.clone()))?;
        Did::new(token).map_err(|_| IdentityError::HandleNotFound(handle.clone()))
    }

    /// Fetch the DID document for a `did:plc` or `did:web` identifier.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self), fields(did = %did)))]
    pub async fn resolve_did_doc(&self, did: &Did) -> Result<DidDocument> {
        let url = match did.method() {
            "plc" => format!("{}/{}", self.plc_directory, did),
            "web" => {
                let domain = percent_decode_str(did.method_specific_id())
                    .decode_utf8()
                    .map_err(|_| IdentityError::UnsupportedMethod(did.to_string()))?;
                // The decoded id must be a bare hostname. A stray delimiter
                // would redirect the fetch to an attacker-chosen path, port,
                // or authority on a host that passes the safety filter.
                if domain.contains(['/', '?', '#', '@', ':']) {
                    return Err(IdentityError::UnsafeUrl(format!("https://{domain}/")));
                }
                format!("https://{domain}/.well-known/did.json")
            }
            method => return Err(IdentityError::UnsupportedMethod(format!("did:{method}"))),
        };

        let res = self.get(&url).await?;
        if res.status() != StatusCode::OK {
            return Err(IdentityError::DidNotFound(did.clone()));
        }
        let doc: DidDocument = serde_json::from_slice(res.body())?;
        if doc.id != *did {
            return Err(IdentityError::DocIdMismatch {
                expected: did.clone(),
                found: doc.id,
            });
        }
        Ok(doc)
    }

    /// Handle input: resolve forward, then confirm the document declares the
    /// same handle back.
    async fn resolve_from_handle(&self, handle: &Handle) -> Result<ResolvedIdentity> {
        let did = self.resolve_handle(handle).await?;
        let doc = self.resolve_did_doc(&did).await?;
        let declared = doc.declared_handle();
        if declared.as_ref() != Some(handle) {
            return Err(IdentityError::HandleMismatch {
                input: handle.clone(),
                did,
                declared,
            });
        }
        Ok(ResolvedIdentity {
            did,
            handle: handle.clone(),
            doc,
        })
    }

    /// DID input: fetch the document, then re-resolve its declared handle and
    /// require it to come back to the same DID.
    async fn resolve_from_did(&self, did: &Did) -> Result<ResolvedIdentity> {
        let doc = self.resolve_did_doc(did).await?;
        let handle = doc
            .declared_handle()
            .ok_or_else(|| IdentityError::NoDeclaredHandle(did.clone()))?;
        let resolved = self.resolve_handle(&handle).await?;
        if resolved != *did {
            return Err(IdentityError::DidMismatch {
                input: did.clone(),
                handle,
                resolved,
            });
        }
        Ok(ResolvedIdentity {
            did: did.clone(),
            handle,
            doc,
        })
    }

    async fn get(&self, url: &str) -> Result<http::Response<Vec<u8>>> {
        if !is_safe_url(url) {
            return Err(IdentityError::UnsafeUrl(url.to_string()));
        }
        let req = http::Request::builder()
            .uri(url)
            .body(Vec::new())
            .map_err(|e| IdentityError::Transport(Box::new(e)))?;
        self.http
            .send_http(req)
            .await
            .map_err(|e| IdentityError::Transport(Box::new(e)))
    }
}

impl<C, D> ResolveIdentity for IdentityResolver<C, D>
where
    C: HttpClient + Sync,
    D: DnsTxtResolver + Sync,
{
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self)))]
    async fn resolve_identity(&self, input: &str) -> Result<ResolvedIdentity> {
        if let Ok(handle) = Handle::new(input) {
            self.resolve_from_handle(&handle).await
        } else if let Ok(did) = Did::new(input) {
            self.resolve_from_did(&did).await
        } else {
            Err(IdentityError::InvalidIdentifier(input.to_string()))
        }
    }
}

impl<T: ResolveIdentity + Sync> ResolveIdentity for std::sync::Arc<T> {
    fn resolve_identity(
        &self,
        input: &str,
    ) -> impl Future<Output = Result<ResolvedIdentity>> + Send {
        self.as_ref().resolve_identity(input)
    }
}

/// DNS TXT lookups backed by hickory.
#[cfg(feature = "dns")]
pub mod dns {
    use hickory_resolver::TokioAsyncResolver;
    use hickory_resolver::config::ResolverConfig;

    use crate::resolver::{DnsTxtResolver, IdentityError, Result};

    #[derive(Clone)]
    pub struct HickoryDns {
        resolver: std::sync::Arc<TokioAsyncResolver>,
    }

    impl HickoryDns {
        pub fn new() -> Self {
            Self {
                resolver: std::sync::Arc::new(TokioAsyncResolver::tokio(
                    ResolverConfig::default(),
                    Default::default(),
                )),
            }
        }
    }

    impl Default for HickoryDns {
        fn default() -> Self {
            Self::new()
        }
    }

    impl DnsTxtResolver for HickoryDns {
        async fn lookup_txt(&self, name: &str) -> Result<Vec<String>> {
            let fqdn = format!("{name}.");
            let response = self
                .resolver
                .txt_lookup(fqdn)
                .await
                .map_err(|e| IdentityError::Dns(e.to_string()))?;
            let mut out = Vec::new();
            for txt in response.iter() {
                for data in txt.txt_data().iter() {
                    out.push(String::from_utf8_lossy(data).to_string());
                }
            }
            Ok(out)
        }
    }
}
