use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Claims {
    #[serde(flatten)]
    pub registered: RegisteredClaims,
    #[serde(flatten)]
    pub public: PublicClaims,
}

/// Registered claims from RFC 7519 §4.1.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RegisteredClaims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<SmolStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<SmolStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<SmolStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<SmolStr>,
}

/// Public claims used by DPoP proofs (RFC 9449 §4.2).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PublicClaims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub htm: Option<SmolStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub htu: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ath: Option<SmolStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<SmolStr>,
}
