use chrono::Utc;
use jose_jwa::{Algorithm, Signing};
use jose_jwk::{Jwk, JwkSet, Key, Parameters, crypto};
use miette::Diagnostic;
use p256::ecdsa::SigningKey;
use smol_str::SmolStr;
use thiserror::Error;

use crate::jose::create_signed_jwt;
use crate::jose::jws::Header;
use crate::jose::jwt::{Claims, RegisteredClaims};
use crate::utils::generate_nonce;

/// Client assertion lifetime. Assertions are single-use, so this only needs
/// to cover clock skew plus transit.
const ASSERTION_LIFETIME_SECS: i64 = 60;

pub const CLIENT_ASSERTION_TYPE_JWT_BEARER: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

#[derive(Debug, Error, Diagnostic)]
pub enum KeysetError {
    #[error("client key must carry a kid")]
    #[diagnostic(code(heddle::oauth::keyset::missing_kid))]
    MissingKid,

    #[error("client key must be a P-256 secret key")]
    #[diagnostic(
        code(heddle::oauth::keyset::not_es256),
        help("the atproto profile signs client assertions with ES256 only")
    )]
    NotEs256Secret,

    #[error("failed to interpret jwk: {0:?}")]
    #[diagnostic(code(heddle::oauth::keyset::jwk_crypto))]
    JwkCrypto(crypto::Error),

    #[error("serde error: {0}")]
    #[diagnostic(code(heddle::oauth::keyset::serde))]
    Serde(#[from] serde_json::Error),
}

/// The confidential client's signing key. Holds a single P-256 secret key
/// with a stable `kid`; the public half is published at the `jwks_uri`.
#[derive(Clone, Debug)]
pub struct Keyset {
    kid: SmolStr,
    key: Key,
}

impl Keyset {
    /// Loads the client key from a JWK JSON document. The JWK must carry a
    /// `kid` and a P-256 private part.
    pub fn from_jwk_json(json: &str) -> Result<Self, KeysetError> {
        let jwk: Jwk = serde_json::from_str(json)?;
        Self::from_jwk(jwk)
    }

    pub fn from_jwk(jwk: Jwk) -> Result<Self, KeysetError> {
        let kid = jwk
            .prm
            .kid
            .as_deref()
            .map(SmolStr::new)
            .ok_or(KeysetError::MissingKid)?;
        match crypto::Key::try_from(&jwk.key).map_err(KeysetError::JwkCrypto)? {
            crypto::Key::P256(crypto::Kind::Secret(_)) => {}
            _ => return Err(KeysetError::NotEs256Secret),
        }
        Ok(Self { kid, key: jwk.key })
    }

    /// Generates a fresh client key. Intended for development setups; real
    /// deployments load a persistent key so the published JWKS stays stable.
    pub fn generate(kid: impl Into<SmolStr>) -> Self {
        Self {
            kid: kid.into(),
            key: crate::utils::generate_key(),
        }
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    fn secret(&self) -> Result<p256::SecretKey, KeysetError> {
        match crypto::Key::try_from(&self.key).map_err(KeysetError::JwkCrypto)? {
            crypto::Key::P256(crypto::Kind::Secret(sk)) => Ok(sk),
            _ => Err(KeysetError::NotEs256Secret),
        }
    }

    /// The public JWKS document to serve at the `jwks_uri`. Never contains
    /// private key parts.
    pub fn public_jwks(&self) -> Result<JwkSet, KeysetError> {
        let secret = self.secret()?;
        let public = Key::from(&crypto::Key::from(secret.public_key()));
        Ok(JwkSet {
            keys: vec![Jwk {
                key: public,
                prm: Parameters {
                    kid: Some(self.kid.to_string()),
                    ..Default::default()
                },
            }],
        })
    }

    /// Builds a `private_key_jwt` client assertion (RFC 7523 §2.2):
    /// `iss` and `sub` are the client id, `aud` is the authorization server
    /// issuer, with a fresh `jti` and a short expiry.
    pub fn create_client_assertion(
        &self,
        client_id: &str,
        audience: &str,
    ) -> Result<String, KeysetError> {
        let secret = self.secret()?;
        let mut header = Header::from(Algorithm::Signing(Signing::Es256));
        header.kid = Some(self.kid.clone());
        let iat = Utc::now().timestamp();
        let claims = Claims {
            registered: RegisteredClaims {
                iss: Some(client_id.into()),
                sub: Some(client_id.into()),
                aud: Some(audience.into()),
                jti: Some(generate_nonce()),
                iat: Some(iat),
                exp: Some(iat + ASSERTION_LIFETIME_SECS),
                ..Default::default()
            },
            ..Default::default()
        };
        Ok(create_signed_jwt(
            SigningKey::from(secret.clone()),
            &header,
            &claims,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    #[test]
    fn public_jwks_has_no_private_part() {
        let keyset = Keyset::generate("kid-1");
        let jwks = keyset.public_jwks().unwrap();
        assert_eq!(jwks.keys.len(), 1);
        assert_eq!(jwks.keys[0].prm.kid.as_deref(), Some("kid-1"));
        let json = serde_json::to_string(&jwks).unwrap();
        assert!(!json.contains("\"d\""));
    }

    #[test]
    fn assertion_claims_are_bound_to_client_and_issuer() {
        let keyset = Keyset::generate("kid-1");
        let jwt = keyset
            .create_client_assertion(
                "https://app.example/oauth/client-metadata.json",
                "https://auth.example",
            )
            .unwrap();
        let mut parts = jwt.split('.');
        let header: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts.next().unwrap()).unwrap())
                .unwrap();
        let claims: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts.next().unwrap()).unwrap())
                .unwrap();
        assert_eq!(header["alg"], "ES256");
        assert_eq!(header["kid"], "kid-1");
        assert_eq!(claims["iss"], claims["sub"]);
        assert_eq!(claims["aud"], "https://auth.example");
        assert!(claims["jti"].is_string());
        let iat = claims["iat"].as_i64().unwrap();
        assert_eq!(claims["exp"].as_i64().unwrap(), iat + 60);
    }

    #[test]
    fn import_requires_kid_and_private_part() {
        let keyset = Keyset::generate("kid-1");
        // strip the kid
        let mut jwk = Jwk {
            key: keyset.key.clone(),
            prm: Parameters::default(),
        };
        assert!(matches!(
            Keyset::from_jwk(jwk.clone()),
            Err(KeysetError::MissingKid)
        ));
        // public-only key is refused
        let public = keyset.public_jwks().unwrap().keys.remove(0);
        jwk = public;
        assert!(matches!(
            Keyset::from_jwk(jwk),
            Err(KeysetError::NotEs256Secret)
        ));
    }

    #[test]
    fn malformed_key_material_is_reported() {
        // 32 zero bytes: well-formed base64url, not a valid P-256 scalar.
        let zeros = "A".repeat(43);
        let json = format!(
            r#"{{"kty":"EC","crv":"P-256","kid":"kid-1","x":"{zeros}","y":"{zeros}","d":"{zeros}"}}"#
        );
        let err = Keyset::from_jwk_json(&json).unwrap_err();
        assert!(matches!(err, KeysetError::JwkCrypto(_)));
        assert!(err.to_string().starts_with("failed to interpret jwk"));
    }
}
