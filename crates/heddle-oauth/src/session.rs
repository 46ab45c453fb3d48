use heddle_identity::{Did, Handle};
use jose_jwk::Key;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use url::Url;

/// Pending authorization request, saved after PAR and consumed exactly once
/// by the callback. The `did`, `handle`, and `pds_url` fields are `None`
/// when login started from a bare service URL; the callback resolves the
/// account identity from the token's `sub` in that case.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthRequest {
    pub state: SmolStr,
    pub authserver_iss: String,
    pub did: Option<Did>,
    pub handle: Option<Handle>,
    pub pds_url: Option<Url>,
    pub scope: SmolStr,
    pub pkce_verifier: SmolStr,
    pub dpop_authserver_nonce: Option<SmolStr>,
    pub dpop_key: Key,
}

/// An authenticated account. The DPoP key is per-session and lives as long
/// as the tokens it binds; the two nonce slots track the authorization
/// server and the PDS independently.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub did: Did,
    pub handle: Option<Handle>,
    pub pds_url: Url,
    pub authserver_iss: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub dpop_authserver_nonce: Option<SmolStr>,
    pub dpop_pds_nonce: Option<SmolStr>,
    pub dpop_key: Key,
}
