use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use heddle_common::HttpClient;
use http::{Request, Response, Uri, header::InvalidHeaderValue};
use jose_jwa::{Algorithm, Signing};
use jose_jwk::{Jwk, Key, crypto};
use miette::Diagnostic;
use p256::ecdsa::SigningKey;
use rand::{RngCore, SeedableRng};
use sha2::Digest;
use smol_str::SmolStr;
use thiserror::Error;

use crate::error::OAuthError;
use crate::jose::{
    create_signed_jwt,
    jws::Header,
    jwt::{Claims, PublicClaims, RegisteredClaims},
};
use crate::types::ErrorBody;

pub const JWT_HEADER_TYP_DPOP: &str = "dpop+jwt";

/// Proof lifetime for authorization-server requests. Resource-server proofs
/// omit `exp`; the PDS enforces its own acceptance window.
const AUTHSERVER_PROOF_LIFETIME_SECS: i64 = 30;

#[derive(Debug, Error, Diagnostic)]
pub enum DpopError {
    #[error(transparent)]
    #[diagnostic(code(heddle::oauth::dpop::header_value))]
    InvalidHeaderValue(#[from] InvalidHeaderValue),

    #[error("crypto error: {0:?}")]
    #[diagnostic(code(heddle::oauth::dpop::jwk_crypto))]
    JwkCrypto(crypto::Error),

    #[error("dpop key is not a P-256 secret key")]
    #[diagnostic(code(heddle::oauth::dpop::unsupported_key))]
    UnsupportedKey,

    #[error(transparent)]
    #[diagnostic(code(heddle::oauth::dpop::serde))]
    SerdeJson(#[from] serde_json::Error),
}

/// Builds a compact ES256 JWS DPoP proof with the public JWK embedded in the
/// header (RFC 9449 §4.2).
pub fn build_dpop_proof(
    key: &Key,
    method: &str,
    htu: &str,
    nonce: Option<&SmolStr>,
    ath: Option<SmolStr>,
    is_to_auth_server: bool,
) -> Result<String, DpopError> {
    let secret = match crypto::Key::try_from(key).map_err(DpopError::JwkCrypto)? {
        crypto::Key::P256(crypto::Kind::Secret(sk)) => sk,
        _ => return Err(DpopError::UnsupportedKey),
    };
    let mut header = Header::from(Algorithm::Signing(Signing::Es256));
    header.typ = Some(JWT_HEADER_TYP_DPOP.into());
    header.jwk = Some(Jwk {
        key: Key::from(&crypto::Key::from(secret.public_key())),
        prm: Default::default(),
    });

    let iat = Utc::now().timestamp();
    let claims = Claims {
        registered: RegisteredClaims {
            jti: Some(generate_jti()),
            iat: Some(iat),
            exp: is_to_auth_server.then_some(iat + AUTHSERVER_PROOF_LIFETIME_SECS),
            ..Default::default()
        },
        public: PublicClaims {
            htm: Some(method.into()),
            htu: Some(htu.into()),
            ath,
            nonce: nonce.cloned(),
        },
    };
    Ok(create_signed_jwt(SigningKey::from(secret), &header, &claims)?)
}

/// Sends a request with a DPoP proof attached, retrying exactly once when the
/// server signals `use_dpop_nonce`. `nonce` is the caller's cached nonce for
/// this server; it is updated in place whenever the server supplies a fresh
/// one, including on successful responses.
///
/// A response that still demands a nonce after the retry is returned as-is;
/// callers classify it when they check the status.
pub async fn send_with_dpop<C>(
    client: &C,
    key: &Key,
    nonce: &mut Option<SmolStr>,
    is_to_auth_server: bool,
    request: Request<Vec<u8>>,
) -> Result<Response<Vec<u8>>, OAuthError>
where
    C: HttpClient + Sync,
{
    let (parts, body) = request.into_parts();
    let method = parts.method.as_str().to_string();
    let htu = proof_htu(&parts.uri);
    // https://datatracker.ietf.org/doc/html/rfc9449#section-4.2
    let ath = parts
        .headers
        .get("Authorization")
        .filter(|v| v.to_str().is_ok_and(|s| s.starts_with("DPoP ")))
        .map(|auth| {
            URL_SAFE_NO_PAD
                .encode(sha2::Sha256::digest(&auth.as_bytes()[5..]))
                .into()
        });

    let init_proof = build_dpop_proof(
        key,
        &method,
        &htu,
        nonce.as_ref(),
        ath.clone(),
        is_to_auth_server,
    )?;
    let request = assemble(&parts, &body, &init_proof)?;
    let response = client
        .send_http(request)
        .await
        .map_err(OAuthError::transport)?;

    let next_nonce: Option<SmolStr> = response
        .headers()
        .get("DPoP-Nonce")
        .and_then(|v| v.to_str().ok())
        .map(SmolStr::new);
    match &next_nonce {
        Some(_) if next_nonce != *nonce => {
            *nonce = next_nonce.clone();
        }
        _ => {
            // No nonce came back or it matches what we sent; nothing to
            // update and no reason to retry.
            return Ok(response);
        }
    }

    if !is_use_dpop_nonce_error(is_to_auth_server, &response) {
        return Ok(response);
    }
    let next_proof = build_dpop_proof(key, &method, &htu, nonce.as_ref(), ath, is_to_auth_server)?;
    let request = assemble(&parts, &body, &next_proof)?;
    let response = client
        .send_http(request)
        .await
        .map_err(OAuthError::transport)?;
    if let Some(fresh) = response
        .headers()
        .get("DPoP-Nonce")
        .and_then(|v| v.to_str().ok())
    {
        *nonce = Some(SmolStr::new(fresh));
    }
    Ok(response)
}

/// Whether the response is the server asking for a proof with its nonce.
/// Authorization servers answer 400 with a JSON error body (RFC 9449 §8);
/// resource servers answer 401 with a `WWW-Authenticate: DPoP` challenge
/// (RFC 9449 §7), though some report it in a JSON body instead.
pub(crate) fn is_use_dpop_nonce_error(
    is_to_auth_server: bool,
    response: &Response<Vec<u8>>,
) -> bool {
    if is_to_auth_server {
        if response.status() == 400 {
            if let Ok(body) = serde_json::from_slice::<ErrorBody>(response.body()) {
                return body.error == "use_dpop_nonce";
            }
        }
        return false;
    }
    if response.status() == 401 {
        if let Some(www_auth) = response
            .headers()
            .get("WWW-Authenticate")
            .and_then(|v| v.to_str().ok())
        {
            if www_auth.starts_with("DPoP") && www_auth.contains(r#"error="use_dpop_nonce""#) {
                return true;
            }
        }
    }
    if response.status() == 400 || response.status() == 401 {
        if let Ok(body) = serde_json::from_slice::<ErrorBody>(response.body()) {
            return body.error == "use_dpop_nonce";
        }
    }
    false
}

/// The `htu` claim: scheme, authority, and path with query and fragment
/// stripped (RFC 9449 §4.2).
fn proof_htu(uri: &Uri) -> String {
    match (uri.scheme_str(), uri.authority()) {
        (Some(scheme), Some(authority)) => format!("{scheme}://{authority}{}", uri.path()),
        _ => uri.path().to_string(),
    }
}

/// `http::Request` is not `Clone`; rebuild it from parts for each attempt.
fn assemble(
    parts: &http::request::Parts,
    body: &[u8],
    proof: &str,
) -> Result<Request<Vec<u8>>, OAuthError> {
    let mut request = Request::builder()
        .method(parts.method.clone())
        .uri(parts.uri.clone())
        .body(body.to_vec())?;
    *request.headers_mut() = parts.headers.clone();
    request
        .headers_mut()
        .insert("DPoP", proof.parse().map_err(DpopError::from)?);
    Ok(request)
}

#[inline]
pub(crate) fn generate_jti() -> SmolStr {
    let mut rng = rand::rngs::SmallRng::from_entropy();
    let mut bytes = [0u8; 12];
    rng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::generate_key;
    use serde_json::Value;

    fn decode_segment(jwt: &str, index: usize) -> Value {
        let segment = jwt.split('.').nth(index).unwrap();
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(segment).unwrap()).unwrap()
    }

    #[test]
    fn proof_carries_embedded_public_jwk() {
        let key = generate_key();
        let proof = build_dpop_proof(
            &key,
            "POST",
            "https://auth.example/oauth/par",
            None,
            None,
            true,
        )
        .unwrap();
        let header = decode_segment(&proof, 0);
        assert_eq!(header["typ"], "dpop+jwt");
        assert_eq!(header["alg"], "ES256");
        assert_eq!(header["jwk"]["kty"], "EC");
        assert_eq!(header["jwk"]["crv"], "P-256");
        assert!(header["jwk"]["d"].is_null());

        let claims = decode_segment(&proof, 1);
        assert_eq!(claims["htm"], "POST");
        assert_eq!(claims["htu"], "https://auth.example/oauth/par");
        assert!(claims["jti"].is_string());
        let iat = claims["iat"].as_i64().unwrap();
        assert_eq!(claims["exp"].as_i64().unwrap(), iat + 30);
        assert!(claims["nonce"].is_null());
        assert!(claims["ath"].is_null());
    }

    #[test]
    fn resource_proof_omits_exp_and_carries_nonce() {
        let key = generate_key();
        let nonce = SmolStr::new("server-nonce");
        let proof = build_dpop_proof(
            &key,
            "GET",
            "https://pds.example/xrpc/com.atproto.repo.getRecord",
            Some(&nonce),
            Some("token-hash".into()),
            false,
        )
        .unwrap();
        let claims = decode_segment(&proof, 1);
        assert!(claims["exp"].is_null());
        assert_eq!(claims["nonce"], "server-nonce");
        assert_eq!(claims["ath"], "token-hash");
    }

    #[test]
    fn htu_strips_query() {
        let uri: Uri = "https://pds.example/xrpc/com.atproto.repo.getRecord?repo=x&rkey=y"
            .parse()
            .unwrap();
        assert_eq!(
            proof_htu(&uri),
            "https://pds.example/xrpc/com.atproto.repo.getRecord"
        );
    }

    #[test]
    fn nonce_demands_are_recognized_per_channel() {
        let authserver_demand = Response::builder()
            .status(400)
            .body(br#"{"error":"use_dpop_nonce"}"#.to_vec())
            .unwrap();
        assert!(is_use_dpop_nonce_error(true, &authserver_demand));
        // resource servers sometimes signal through the body too
        assert!(is_use_dpop_nonce_error(false, &authserver_demand));

        let resource_demand = Response::builder()
            .status(401)
            .header(
                "WWW-Authenticate",
                r#"DPoP error="use_dpop_nonce", error_description="nonce required""#,
            )
            .body(Vec::new())
            .unwrap();
        assert!(is_use_dpop_nonce_error(false, &resource_demand));
        assert!(!is_use_dpop_nonce_error(true, &resource_demand));

        let other_error = Response::builder()
            .status(400)
            .body(br#"{"error":"invalid_grant"}"#.to_vec())
            .unwrap();
        assert!(!is_use_dpop_nonce_error(true, &other_error));
    }
}
