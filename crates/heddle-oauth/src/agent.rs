//! Authenticated requests to a PDS. Access tokens are DPoP-bound, so every
//! request carries both an `Authorization: DPoP <token>` header and a proof
//! whose `ath` claim hashes that token.

use heddle_common::{HttpClient, is_safe_url};
use http::{Request, Response};

use crate::dpop::send_with_dpop;
use crate::error::OAuthError;
use crate::session::Session;
use crate::store::{AuthStore, NonceSlot};

/// Sends `request` authenticated as `session`'s account. The PDS nonce is
/// tracked separately from the authorization server nonce; when the PDS
/// issues a fresh one it is written back to both the in-memory session and
/// the store, so later requests skip the `use_dpop_nonce` round trip.
///
/// Responses are returned as-is once the bounded nonce retry is spent;
/// callers interpret application-level status codes.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(level = "debug", skip_all, fields(did = %session.did, uri = %request.uri()))
)]
pub async fn pds_authed_req<C, S>(
    client: &C,
    store: &S,
    session: &mut Session,
    mut request: Request<Vec<u8>>,
) -> Result<Response<Vec<u8>>, OAuthError>
where
    C: HttpClient + Sync,
    S: AuthStore + ?Sized,
{
    let target = request.uri().to_string();
    if !is_safe_url(&target) {
        return Err(OAuthError::UnsafeUrl(target));
    }
    request.headers_mut().insert(
        "Authorization",
        format!("DPoP {}", session.access_token)
            .parse()
            .map_err(crate::dpop::DpopError::from)?,
    );

    let mut nonce = session.dpop_pds_nonce.clone();
    let response = send_with_dpop(client, &session.dpop_key, &mut nonce, false, request).await?;

    if nonce != session.dpop_pds_nonce {
        session.dpop_pds_nonce = nonce.clone();
        if let Some(value) = &nonce {
            store
                .update_nonce(&session.did, NonceSlot::Pds, value)
                .await?;
        }
    }
    Ok(response)
}
