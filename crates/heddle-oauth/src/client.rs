//! End-to-end confidential client flow: login kickoff, callback handling,
//! refresh, and authenticated PDS calls, glued to an [`AuthStore`] for
//! persistence.

use heddle_common::{HttpClient, is_safe_url};
use heddle_identity::{Did, Handle, ResolveIdentity};
use http::{Request, Response};
use serde::Serialize;
use smol_str::SmolStr;
use url::Url;

use crate::agent::pds_authed_req;
use crate::config::ClientConfig;
use crate::error::OAuthError;
use crate::request::{initial_token_request, refresh_token_request, send_par_request};
use crate::resolver::{fetch_authserver_meta, issuer_equivalent, resolve_pds_authserver};
use crate::session::{AuthRequest, Session};
use crate::store::AuthStore;
use crate::types::CallbackParams;

/// A confidential atproto OAuth client. `C` is the (hardened) HTTP
/// transport, `R` resolves handles and DIDs, and `S` persists pending
/// requests and sessions.
pub struct OAuthClient<C, R, S> {
    http: C,
    resolver: R,
    store: S,
    config: ClientConfig,
}

impl<C, R, S> OAuthClient<C, R, S>
where
    C: HttpClient + Sync,
    R: ResolveIdentity + Sync,
    S: AuthStore,
{
    pub fn new(http: C, resolver: R, store: S, config: ClientConfig) -> Self {
        Self {
            http,
            resolver,
            store,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Starts a login for a handle, DID, or PDS/entryway URL. Resolves the
    /// account (when given an identifier), discovers and validates the
    /// authorization server, pushes the authorization request, and persists
    /// the pending state. Returns the URL to redirect the user to.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip(self), fields(input = %input))
    )]
    pub async fn start_login(&self, input: &str) -> Result<Url, OAuthError> {
        let (login_hint, did, handle, pds_url, authserver) = if Did::new(input).is_ok()
            || Handle::new(input).is_ok()
        {
            let identity = self.resolver.resolve_identity(input).await?;
            let pds = identity.pds_url()?;
            let authserver = resolve_pds_authserver(&self.http, &pds).await?;
            (
                Some(input),
                Some(identity.did),
                Some(identity.handle),
                Some(pds),
                authserver,
            )
        } else if input.starts_with("https://") && is_safe_url(input) {
            // a bare URL may be a PDS or the authorization server itself
            let url = Url::parse(input)?;
            let authserver = match resolve_pds_authserver(&self.http, &url).await {
                Ok(issuer) => issuer,
                Err(_) => url,
            };
            (None, None, None, None, authserver)
        } else {
            return Err(OAuthError::Callback(format!(
                "not a handle, DID, or safe https URL: {input}"
            )));
        };

        let metadata = fetch_authserver_meta(&self.http, &authserver).await?;
        let par = send_par_request(&self.http, &metadata, &self.config, login_hint).await?;

        self.store
            .save_request(AuthRequest {
                state: par.state,
                authserver_iss: metadata.issuer.clone(),
                did,
                handle,
                pds_url,
                scope: self.config.scope.clone(),
                pkce_verifier: par.pkce_verifier,
                dpop_authserver_nonce: par.dpop_authserver_nonce,
                dpop_key: par.dpop_key,
            })
            .await?;

        authorize_url(
            &metadata.authorization_endpoint,
            &self.config,
            &par.request_uri,
        )
    }

    /// Handles the authorization server's redirect back to us. Consumes the
    /// pending request (each `state` works exactly once), verifies the `iss`
    /// echo, exchanges the code, and pins the session to the token's `sub`.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip_all, fields(state = %params.state))
    )]
    pub async fn callback(&self, params: &CallbackParams) -> Result<Session, OAuthError> {
        let Some(request) = self.store.consume_request(&params.state).await? else {
            return Err(OAuthError::Replay(params.state.clone()));
        };
        if !issuer_equivalent(&request.authserver_iss, &params.iss) {
            return Err(OAuthError::IssuerMismatch {
                expected: request.authserver_iss.clone(),
                got: params.iss.to_string(),
            });
        }

        let (tokens, nonce) =
            initial_token_request(&self.http, &request, &params.code, &self.config).await?;
        let sub = tokens
            .sub
            .as_deref()
            .ok_or_else(|| OAuthError::Callback("token response is missing sub".into()))?;
        let sub_did = Did::new(sub)?;

        let (did, handle, pds_url) = if let Some(did) = request.did.clone() {
            if sub_did != did {
                return Err(OAuthError::TokenSubjectMismatch {
                    expected: did,
                    got: sub.to_string(),
                });
            }
            let pds_url = request.pds_url.clone().ok_or_else(|| {
                OAuthError::Callback("pending request has a DID but no PDS".into())
            })?;
            (did, request.handle.clone(), pds_url)
        } else {
            // login started from a bare URL; the token's sub names the
            // account, and its authorization server must match the issuer
            // we actually spoke to
            let identity = self.resolver.resolve_identity(sub_did.as_str()).await?;
            let pds_url = identity.pds_url()?;
            let authserver = resolve_pds_authserver(&self.http, &pds_url).await?;
            if !issuer_equivalent(authserver.as_str(), &request.authserver_iss) {
                return Err(OAuthError::IssuerMismatch {
                    expected: request.authserver_iss.clone(),
                    got: authserver.to_string(),
                });
            }
            (identity.did, Some(identity.handle), pds_url)
        };

        if tokens.scope.as_deref() != Some(request.scope.as_str()) {
            return Err(OAuthError::ScopeMismatch {
                requested: request.scope.clone(),
                granted: tokens.scope.as_deref().map(SmolStr::new),
            });
        }

        let session = Session {
            did,
            handle,
            pds_url,
            authserver_iss: request.authserver_iss,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            dpop_authserver_nonce: nonce,
            dpop_pds_nonce: None,
            dpop_key: request.dpop_key,
        };
        self.store.upsert_session(session.clone()).await?;
        Ok(session)
    }

    /// Refreshes the session's tokens and persists the result.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip(self), fields(did = %did))
    )]
    pub async fn refresh(&self, did: &Did) -> Result<Session, OAuthError> {
        let mut session = self.session(did).await?;
        let (tokens, nonce) = refresh_token_request(&self.http, &session, &self.config).await?;
        session.access_token = tokens.access_token;
        if let Some(refresh_token) = tokens.refresh_token {
            session.refresh_token = Some(refresh_token);
        }
        session.dpop_authserver_nonce = nonce;
        self.store.upsert_session(session.clone()).await?;
        Ok(session)
    }

    /// Sends an authenticated request to the account's PDS, refreshing the
    /// persisted PDS nonce as a side effect.
    pub async fn pds_request(
        &self,
        did: &Did,
        request: Request<Vec<u8>>,
    ) -> Result<Response<Vec<u8>>, OAuthError> {
        let mut session = self.session(did).await?;
        pds_authed_req(&self.http, &self.store, &mut session, request).await
    }

    /// Drops the local session. Token revocation upstream is not attempted;
    /// the tokens simply age out.
    pub async fn logout(&self, did: &Did) -> Result<(), OAuthError> {
        self.store.delete_session(did).await?;
        Ok(())
    }

    pub async fn session(&self, did: &Did) -> Result<Session, OAuthError> {
        self.store
            .get_session(did)
            .await?
            .ok_or_else(|| OAuthError::SessionNotFound(did.clone()))
    }
}

/// Builds the user-facing authorization URL:
/// `{authorization_endpoint}?client_id=...&request_uri=...`.
fn authorize_url(
    endpoint: &str,
    config: &ClientConfig,
    request_uri: &str,
) -> Result<Url, OAuthError> {
    if !is_safe_url(endpoint) {
        return Err(OAuthError::UnsafeUrl(endpoint.to_string()));
    }
    #[derive(Serialize)]
    struct Parameters<'s> {
        client_id: &'s str,
        request_uri: &'s str,
    }
    let query = serde_html_form::to_string(Parameters {
        client_id: config.client_id.as_str(),
        request_uri,
    })?;
    Ok(Url::parse(&format!("{endpoint}?{query}"))?)
}
