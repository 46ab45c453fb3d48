//! Shared plumbing for heddle: the [`HttpClient`] seam, the SSRF-hardened
//! outbound transport, and the URL safety filter every network-facing
//! component routes its targets through.

pub mod error;
pub mod http_client;
pub mod safety;

pub use error::TransportError;
pub use http_client::HttpClient;
pub use safety::is_safe_url;

#[cfg(feature = "reqwest-client")]
pub use http_client::HardenedClient;
