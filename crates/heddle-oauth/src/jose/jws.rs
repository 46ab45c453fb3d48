use jose_jwa::Algorithm;
use jose_jwk::Jwk;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// JWS protected header, limited to the fields the atproto profile uses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub alg: Algorithm,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwk: Option<Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<SmolStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typ: Option<SmolStr>,
}

impl From<Algorithm> for Header {
    fn from(alg: Algorithm) -> Self {
        Self {
            alg,
            jwk: None,
            kid: None,
            typ: None,
        }
    }
}
