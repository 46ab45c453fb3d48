use jose_jwk::JwkSet;
use smol_str::SmolStr;
use url::Url;

use crate::error::OAuthError;
use crate::keyset::{Keyset, KeysetError};
use crate::types::ClientMetadata;

/// Immutable configuration for a confidential client. Built once at startup;
/// the `client_id` doubles as the URL where [`ClientMetadata`] is served.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub client_id: Url,
    pub redirect_uri: Url,
    pub jwks_uri: Url,
    pub scope: SmolStr,
    pub client_name: Option<SmolStr>,
    pub client_uri: Option<Url>,
    pub keyset: Keyset,
}

impl ClientConfig {
    pub const DEFAULT_SCOPE: &'static str = "atproto transition:generic";

    pub fn new(client_id: Url, redirect_uri: Url, jwks_uri: Url, keyset: Keyset) -> Self {
        Self {
            client_id,
            redirect_uri,
            jwks_uri,
            scope: Self::DEFAULT_SCOPE.into(),
            client_name: None,
            client_uri: None,
            keyset,
        }
    }

    /// Derives the conventional endpoint layout under an application's base
    /// URL: `oauth/client-metadata.json`, `oauth/callback`, and
    /// `oauth/jwks.json`.
    pub fn for_app_url(app_url: &Url, keyset: Keyset) -> Result<Self, OAuthError> {
        let config = Self {
            client_id: app_url.join("oauth/client-metadata.json")?,
            redirect_uri: app_url.join("oauth/callback")?,
            jwks_uri: app_url.join("oauth/jwks.json")?,
            scope: Self::DEFAULT_SCOPE.into(),
            client_name: None,
            client_uri: Some(app_url.clone()),
            keyset,
        };
        Ok(config)
    }

    pub fn with_scope(mut self, scope: impl Into<SmolStr>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_client_name(mut self, name: impl Into<SmolStr>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// The client identity document to serve at the `client_id` URL.
    pub fn client_metadata(&self) -> ClientMetadata {
        ClientMetadata {
            client_id: self.client_id.clone(),
            application_type: "web".into(),
            grant_types: vec!["authorization_code".into(), "refresh_token".into()],
            response_types: vec!["code".into()],
            redirect_uris: vec![self.redirect_uri.clone()],
            dpop_bound_access_tokens: true,
            token_endpoint_auth_method: "private_key_jwt".into(),
            token_endpoint_auth_signing_alg: "ES256".into(),
            scope: self.scope.clone(),
            jwks_uri: self.jwks_uri.clone(),
            client_name: self.client_name.clone(),
            client_uri: self.client_uri.clone(),
        }
    }

    /// The public JWKS document to serve at the `jwks_uri`.
    pub fn jwks(&self) -> Result<JwkSet, KeysetError> {
        self.keyset.public_jwks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_url_layout() {
        let app = Url::parse("https://app.example/").unwrap();
        let config = ClientConfig::for_app_url(&app, Keyset::generate("kid-1")).unwrap();
        assert_eq!(
            config.client_id.as_str(),
            "https://app.example/oauth/client-metadata.json"
        );
        assert_eq!(
            config.redirect_uri.as_str(),
            "https://app.example/oauth/callback"
        );
        assert_eq!(config.jwks_uri.as_str(), "https://app.example/oauth/jwks.json");
    }

    #[test]
    fn metadata_document_declares_confidential_client() {
        let app = Url::parse("https://app.example/").unwrap();
        let config = ClientConfig::for_app_url(&app, Keyset::generate("kid-1"))
            .unwrap()
            .with_client_name("Example App");
        let doc = config.client_metadata();
        assert_eq!(doc.token_endpoint_auth_method, "private_key_jwt");
        assert_eq!(doc.token_endpoint_auth_signing_alg, "ES256");
        assert!(doc.dpop_bound_access_tokens);
        assert_eq!(doc.redirect_uris, vec![config.redirect_uri.clone()]);
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["client_name"], "Example App");
        assert_eq!(json["application_type"], "web");
    }
}
