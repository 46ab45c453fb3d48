use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use url::Url;

use crate::error::OAuthError;

/// Authorization server metadata from
/// `/.well-known/oauth-authorization-server` (RFC 8414), limited to the
/// fields the atproto profile constrains.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub response_types_supported: Vec<String>,
    #[serde(default)]
    pub grant_types_supported: Vec<String>,
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
    #[serde(default)]
    pub token_endpoint_auth_methods_supported: Vec<String>,
    #[serde(default)]
    pub token_endpoint_auth_signing_alg_values_supported: Vec<String>,
    #[serde(default)]
    pub dpop_signing_alg_values_supported: Vec<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pushed_authorization_request_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_pushed_authorization_requests: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_response_iss_parameter_supported: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id_metadata_document_supported: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_request_uri_registration: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<String>,
}

impl AuthServerMetadata {
    /// Validates the document against the atproto OAuth profile. `fetch_url`
    /// is the URL the document was retrieved from; the issuer must match its
    /// origin exactly.
    pub fn validate(&self, fetch_url: &Url) -> Result<(), OAuthError> {
        let invalid = |msg: &str| OAuthError::InvalidServerMetadata(msg.into());

        let issuer = Url::parse(&self.issuer).map_err(|_| invalid("issuer is not a valid URL"))?;
        if issuer.scheme() != "https" {
            return Err(invalid("issuer must use https"));
        }
        if issuer.host_str() != fetch_url.host_str() {
            return Err(invalid("issuer host does not match the fetched origin"));
        }
        if issuer.port().is_some() {
            return Err(invalid("issuer must not carry a port"));
        }
        if !matches!(issuer.path(), "" | "/") {
            return Err(invalid("issuer must not carry a path"));
        }
        if issuer.query().is_some() || issuer.fragment().is_some() {
            return Err(invalid("issuer must not carry a query or fragment"));
        }

        let contains = |haystack: &[String], needle: &str| haystack.iter().any(|v| v == needle);
        if !contains(&self.response_types_supported, "code") {
            return Err(invalid("response_types_supported must include \"code\""));
        }
        if !contains(&self.grant_types_supported, "authorization_code") {
            return Err(invalid(
                "grant_types_supported must include \"authorization_code\"",
            ));
        }
        if !contains(&self.grant_types_supported, "refresh_token") {
            return Err(invalid(
                "grant_types_supported must include \"refresh_token\"",
            ));
        }
        if !contains(&self.code_challenge_methods_supported, "S256") {
            return Err(invalid(
                "code_challenge_methods_supported must include \"S256\"",
            ));
        }
        if !contains(&self.token_endpoint_auth_methods_supported, "none") {
            return Err(invalid(
                "token_endpoint_auth_methods_supported must include \"none\"",
            ));
        }
        if !contains(
            &self.token_endpoint_auth_methods_supported,
            "private_key_jwt",
        ) {
            return Err(invalid(
                "token_endpoint_auth_methods_supported must include \"private_key_jwt\"",
            ));
        }
        if !contains(
            &self.token_endpoint_auth_signing_alg_values_supported,
            "ES256",
        ) {
            return Err(invalid(
                "token_endpoint_auth_signing_alg_values_supported must include \"ES256\"",
            ));
        }
        if !contains(&self.scopes_supported, "atproto") {
            return Err(invalid("scopes_supported must include \"atproto\""));
        }
        if !contains(&self.dpop_signing_alg_values_supported, "ES256") {
            return Err(invalid(
                "dpop_signing_alg_values_supported must include \"ES256\"",
            ));
        }
        if self.authorization_response_iss_parameter_supported != Some(true) {
            return Err(invalid(
                "authorization_response_iss_parameter_supported must be true",
            ));
        }
        if self.pushed_authorization_request_endpoint.is_none() {
            return Err(invalid(
                "pushed_authorization_request_endpoint must be present",
            ));
        }
        if self.require_pushed_authorization_requests != Some(true) {
            return Err(invalid(
                "require_pushed_authorization_requests must be true",
            ));
        }
        if self.client_id_metadata_document_supported != Some(true) {
            return Err(invalid("client_id_metadata_document_supported must be true"));
        }
        if self.require_request_uri_registration == Some(false) {
            return Err(invalid(
                "require_request_uri_registration, when present, must be true",
            ));
        }
        Ok(())
    }
}

/// Metadata from `/.well-known/oauth-protected-resource` on a PDS
/// (RFC 9728). Only the authorization server list matters here.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default)]
    pub authorization_servers: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ParResponse {
    pub request_uri: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// OAuth error body, `{"error": "...", "error_description": "..."}`.
#[derive(Clone, Debug, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Query parameters delivered to the redirect URI on a successful
/// authorization.
#[derive(Clone, Debug, Deserialize)]
pub struct CallbackParams {
    pub state: SmolStr,
    pub iss: SmolStr,
    pub code: SmolStr,
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Code,
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub enum CodeChallengeMethod {
    S256,
}

/// Form body for a pushed authorization request (RFC 9126 §2).
#[derive(Clone, Debug, Serialize)]
pub struct ParParameters {
    pub response_type: ResponseType,
    pub redirect_uri: Url,
    pub state: SmolStr,
    pub scope: SmolStr,
    pub code_challenge: SmolStr,
    pub code_challenge_method: CodeChallengeMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_hint: Option<SmolStr>,
}

/// Form body for the authorization-code token exchange.
#[derive(Clone, Debug, Serialize)]
pub struct CodeGrantParameters {
    pub grant_type: GrantType,
    pub code: SmolStr,
    pub redirect_uri: Url,
    pub code_verifier: SmolStr,
}

/// Form body for a refresh-token grant.
#[derive(Clone, Debug, Serialize)]
pub struct RefreshGrantParameters {
    pub grant_type: GrantType,
    pub refresh_token: String,
}

/// The client identity document served at the `client_id` URL, per the
/// atproto "client metadata" scheme.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub client_id: Url,
    pub application_type: SmolStr,
    pub grant_types: Vec<SmolStr>,
    pub response_types: Vec<SmolStr>,
    pub redirect_uris: Vec<Url>,
    pub dpop_bound_access_tokens: bool,
    pub token_endpoint_auth_method: SmolStr,
    pub token_endpoint_auth_signing_alg: SmolStr,
    pub scope: SmolStr,
    pub jwks_uri: Url,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<SmolStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_uri: Option<Url>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::valid_metadata;

    #[test]
    fn accepts_conforming_metadata() {
        let meta = valid_metadata("https://auth.example");
        let fetched = Url::parse("https://auth.example").unwrap();
        assert!(meta.validate(&fetched).is_ok());
    }

    #[test]
    fn rejects_issuer_origin_mismatch() {
        let meta = valid_metadata("https://evil.example");
        let fetched = Url::parse("https://auth.example").unwrap();
        assert!(meta.validate(&fetched).is_err());
    }

    #[test]
    fn rejects_issuer_with_path_or_port() {
        let fetched = Url::parse("https://auth.example").unwrap();
        let mut meta = valid_metadata("https://auth.example");
        meta.issuer = "https://auth.example/tenant".into();
        assert!(meta.validate(&fetched).is_err());
        meta.issuer = "https://auth.example:8443".into();
        assert!(meta.validate(&fetched).is_err());
    }

    #[test]
    fn rejects_missing_par_endpoint() {
        let fetched = Url::parse("https://auth.example").unwrap();
        let mut meta = valid_metadata("https://auth.example");
        meta.pushed_authorization_request_endpoint = None;
        assert!(meta.validate(&fetched).is_err());
    }

    #[test]
    fn rejects_missing_iss_parameter_support() {
        let fetched = Url::parse("https://auth.example").unwrap();
        let mut meta = valid_metadata("https://auth.example");
        meta.authorization_response_iss_parameter_supported = None;
        assert!(meta.validate(&fetched).is_err());
    }

    #[test]
    fn par_parameters_encode_as_form() {
        let params = ParParameters {
            response_type: ResponseType::Code,
            redirect_uri: Url::parse("https://app.example/oauth/callback").unwrap(),
            state: "abc".into(),
            scope: "atproto".into(),
            code_challenge: "challenge".into(),
            code_challenge_method: CodeChallengeMethod::S256,
            login_hint: None,
        };
        let encoded = serde_html_form::to_string(&params).unwrap();
        assert!(encoded.contains("response_type=code"));
        assert!(encoded.contains("code_challenge_method=S256"));
        assert!(!encoded.contains("login_hint"));
    }
}
