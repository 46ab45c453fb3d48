use async_trait::async_trait;
use dashmap::DashMap;
use heddle_identity::Did;
use miette::Diagnostic;
use smol_str::SmolStr;
use thiserror::Error;

use crate::session::{AuthRequest, Session};

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    #[diagnostic(code(heddle::oauth::store::backend))]
    Backend(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(err))
    }
}

/// Which server a persisted DPoP nonce belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NonceSlot {
    AuthServer,
    Pds,
}

/// Persistence for pending authorization requests and sessions. Implement
/// this over a database for real deployments; [`MemoryAuthStore`] backs
/// tests and single-process setups.
///
/// `consume_request` must remove the record in the same operation that reads
/// it, so each `state` is accepted at most once even under concurrent
/// callbacks.
#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn save_request(&self, request: AuthRequest) -> Result<(), StoreError>;

    /// Fetches and deletes the pending request for `state`, atomically.
    async fn consume_request(&self, state: &str) -> Result<Option<AuthRequest>, StoreError>;

    async fn upsert_session(&self, session: Session) -> Result<(), StoreError>;

    async fn get_session(&self, did: &Did) -> Result<Option<Session>, StoreError>;

    /// Persists a server-issued DPoP nonce so later requests skip the
    /// `use_dpop_nonce` round trip. Last write wins.
    async fn update_nonce(&self, did: &Did, slot: NonceSlot, value: &str)
    -> Result<(), StoreError>;

    async fn delete_session(&self, did: &Did) -> Result<(), StoreError>;
}

/// In-memory store over concurrent maps.
#[derive(Debug, Default)]
pub struct MemoryAuthStore {
    requests: DashMap<SmolStr, AuthRequest>,
    sessions: DashMap<Did, Session>,
}

impl MemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthStore for MemoryAuthStore {
    async fn save_request(&self, request: AuthRequest) -> Result<(), StoreError> {
        self.requests.insert(request.state.clone(), request);
        Ok(())
    }

    async fn consume_request(&self, state: &str) -> Result<Option<AuthRequest>, StoreError> {
        Ok(self.requests.remove(state).map(|(_, request)| request))
    }

    async fn upsert_session(&self, session: Session) -> Result<(), StoreError> {
        self.sessions.insert(session.did.clone(), session);
        Ok(())
    }

    async fn get_session(&self, did: &Did) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.get(did).map(|entry| entry.clone()))
    }

    async fn update_nonce(
        &self,
        did: &Did,
        slot: NonceSlot,
        value: &str,
    ) -> Result<(), StoreError> {
        if let Some(mut session) = self.sessions.get_mut(did) {
            match slot {
                NonceSlot::AuthServer => session.dpop_authserver_nonce = Some(value.into()),
                NonceSlot::Pds => session.dpop_pds_nonce = Some(value.into()),
            }
        }
        Ok(())
    }

    async fn delete_session(&self, did: &Did) -> Result<(), StoreError> {
        self.sessions.remove(did);
        Ok(())
    }
}
