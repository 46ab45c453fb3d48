use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use elliptic_curve::SecretKey;
use jose_jwk::{Key, crypto};
use rand::{CryptoRng, RngCore, rngs::ThreadRng};
use sha2::{Digest, Sha256};
use smol_str::SmolStr;

use crate::error::OAuthError;
use crate::types::AuthServerMetadata;

/// Generates a fresh P-256 keypair for DPoP proofs. The atproto profile
/// mandates ES256, so no other algorithm is produced.
pub fn generate_key() -> Key {
    Key::from(&crypto::Key::from(SecretKey::<p256::NistP256>::random(
        &mut ThreadRng::default(),
    )))
}

/// Generates a DPoP key after confirming the server advertises ES256.
pub fn generate_dpop_key(metadata: &AuthServerMetadata) -> Result<Key, OAuthError> {
    if !metadata
        .dpop_signing_alg_values_supported
        .iter()
        .any(|alg| alg == "ES256")
    {
        return Err(OAuthError::InvalidServerMetadata(
            "dpop_signing_alg_values_supported must include ES256".into(),
        ));
    }
    Ok(generate_key())
}

pub fn generate_nonce() -> SmolStr {
    URL_SAFE_NO_PAD
        .encode(get_random_values::<_, 16>(&mut ThreadRng::default()))
        .into()
}

pub fn generate_verifier() -> SmolStr {
    URL_SAFE_NO_PAD
        .encode(get_random_values::<_, 48>(&mut ThreadRng::default()))
        .into()
}

pub fn get_random_values<R, const LEN: usize>(rng: &mut R) -> [u8; LEN]
where
    R: RngCore + CryptoRng,
{
    let mut bytes = [0u8; LEN];
    rng.fill_bytes(&mut bytes);
    bytes
}

/// Returns `(challenge, verifier)` per RFC 7636 §4 with the S256 method.
pub fn generate_pkce() -> (SmolStr, SmolStr) {
    let verifier = generate_verifier();
    (
        URL_SAFE_NO_PAD
            .encode(Sha256::digest(verifier.as_str()))
            .into(),
        verifier,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_is_unique_and_unpadded() {
        let a = generate_nonce();
        let b = generate_nonce();
        assert_ne!(a, b);
        assert!(!a.contains('='));
    }

    #[test]
    fn pkce_challenge_matches_verifier() {
        let (challenge, verifier) = generate_pkce();
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_str()));
        assert_eq!(challenge, expected.as_str());
        // 48 random bytes encode to 64 chars, inside RFC 7636 bounds
        assert!(verifier.len() >= 48 && verifier.len() <= 128);
    }

    #[test]
    fn dpop_key_requires_es256() {
        let mut meta = AuthServerMetadata::default();
        meta.dpop_signing_alg_values_supported = vec!["RS256".into()];
        assert!(generate_dpop_key(&meta).is_err());
        meta.dpop_signing_alg_values_supported.push("ES256".into());
        assert!(generate_dpop_key(&meta).is_ok());
    }
}
