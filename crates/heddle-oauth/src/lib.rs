//! Confidential-client OAuth for the AT Protocol: pushed authorization
//! requests, DPoP-bound tokens with per-server nonce tracking, and
//! `private_key_jwt` client authentication.
//!
//! The usual shape is one [`OAuthClient`] per process, wired to a hardened
//! HTTP transport, an identity resolver, and an [`AuthStore`]:
//!
//! ```no_run
//! use heddle_common::HardenedClient;
//! use heddle_identity::IdentityResolver;
//! use heddle_oauth::{ClientConfig, Keyset, MemoryAuthStore, OAuthClient};
//! use std::sync::Arc;
//! use url::Url;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let http = Arc::new(HardenedClient::new()?);
//! let config = ClientConfig::for_app_url(
//!     &Url::parse("https://app.example/")?,
//!     Keyset::generate("key-1"),
//! )?;
//! let client = OAuthClient::new(
//!     http.clone(),
//!     Arc::new(IdentityResolver::new(http)),
//!     MemoryAuthStore::new(),
//!     config,
//! );
//! let redirect = client.start_login("alice.example").await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod client;
pub mod config;
pub mod dpop;
pub mod error;
pub mod jose;
pub mod keyset;
pub mod request;
pub mod resolver;
pub mod session;
pub mod store;
pub mod types;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::pds_authed_req;
pub use client::OAuthClient;
pub use config::ClientConfig;
pub use error::OAuthError;
pub use keyset::Keyset;
pub use session::{AuthRequest, Session};
pub use store::{AuthStore, MemoryAuthStore, NonceSlot};
pub use types::{AuthServerMetadata, CallbackParams, ClientMetadata, TokenResponse};
