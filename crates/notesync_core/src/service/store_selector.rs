//! Store selector state machine.
//!
//! # Responsibility
//! - Track which backing store is authoritative and the remote connection
//!   status as one explicit owned state object.
//! - Reject transitions the connection lifecycle does not allow.
//!
//! # Invariants
//! - `Remote` is authoritative only with a live session (owner + store).
//! - `connecting` is always entered before `connected` or `error`.
//! - `error` keeps the previously authoritative store.

use crate::sync::remote_spi::RemoteStore;
use crate::sync::remote_types::OwnerId;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Remote connection lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Unconfigured,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl Display for ConnectionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live remote session: the owner identity plus the adapter serving it.
#[derive(Clone)]
pub struct RemoteSession {
    pub provider_id: String,
    pub owner_id: OwnerId,
    pub store: Arc<dyn RemoteStore>,
}

impl std::fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession")
            .field("provider_id", &self.provider_id)
            .field("owner_id", &self.owner_id)
            .finish_non_exhaustive()
    }
}

/// Authoritative backing store.
#[derive(Debug, Clone)]
pub enum ActiveStore {
    Local,
    Remote(RemoteSession),
}

/// Rejected selector transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: ConnectionStatus,
    pub to: ConnectionStatus,
}

impl Display for InvalidTransition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "store selector cannot move from {} to {}", self.from, self.to)
    }
}

impl Error for InvalidTransition {}

/// Owned store-selection state with controlled transitions.
#[derive(Debug, Clone)]
pub struct StoreSelector {
    active: ActiveStore,
    status: ConnectionStatus,
    last_error: Option<String>,
}

impl Default for StoreSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreSelector {
    /// Initial state: local store authoritative, no remote configured.
    pub fn new() -> Self {
        Self {
            active: ActiveStore::Local,
            status: ConnectionStatus::Unconfigured,
            last_error: None,
        }
    }

    pub fn active(&self) -> &ActiveStore {
        &self.active
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Active remote session, if the remote store is authoritative.
    pub fn session(&self) -> Option<&RemoteSession> {
        match &self.active {
            ActiveStore::Remote(session) => Some(session),
            ActiveStore::Local => None,
        }
    }

    pub fn is_remote(&self) -> bool {
        self.session().is_some()
    }

    pub fn is_remote_connected(&self) -> bool {
        self.is_remote() && self.status == ConnectionStatus::Connected
    }

    /// Enters `connecting`. Allowed from every state, so a retry may start
    /// while a prior attempt is still considered in flight.
    pub fn begin_connecting(&mut self) {
        self.status = ConnectionStatus::Connecting;
        self.last_error = None;
    }

    /// `connecting → connected`, making `session` authoritative.
    pub fn connected(&mut self, session: RemoteSession) -> Result<(), InvalidTransition> {
        self.require_connecting(ConnectionStatus::Connected)?;
        self.active = ActiveStore::Remote(session);
        self.status = ConnectionStatus::Connected;
        self.last_error = None;
        Ok(())
    }

    /// `connecting → error`, keeping `fallback` authoritative.
    pub fn failed(
        &mut self,
        fallback: ActiveStore,
        message: impl Into<String>,
    ) -> Result<(), InvalidTransition> {
        self.require_connecting(ConnectionStatus::Error)?;
        self.active = fallback;
        self.status = ConnectionStatus::Error;
        self.last_error = Some(message.into());
        Ok(())
    }

    /// Any state → `unconfigured` with the local store authoritative.
    pub fn reset_to_local(&mut self) {
        self.active = ActiveStore::Local;
        self.status = ConnectionStatus::Unconfigured;
        self.last_error = None;
    }

    fn require_connecting(&self, to: ConnectionStatus) -> Result<(), InvalidTransition> {
        if self.status == ConnectionStatus::Connecting {
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self.status,
                to,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ActiveStore, ConnectionStatus, RemoteSession, StoreSelector};
    use crate::sync::memory::MemoryRemote;
    use crate::sync::remote_types::OwnerId;
    use std::sync::Arc;

    fn session(owner: &str) -> RemoteSession {
        RemoteSession {
            provider_id: "memory".to_string(),
            owner_id: OwnerId::new(owner),
            store: Arc::new(MemoryRemote::new()),
        }
    }

    #[test]
    fn starts_unconfigured_and_local() {
        let selector = StoreSelector::new();
        assert_eq!(selector.status(), ConnectionStatus::Unconfigured);
        assert!(matches!(selector.active(), ActiveStore::Local));
        assert!(!selector.is_remote_connected());
    }

    #[test]
    fn connect_success_path() {
        let mut selector = StoreSelector::new();
        selector.begin_connecting();
        assert_eq!(selector.status(), ConnectionStatus::Connecting);
        selector.connected(session("u1")).unwrap();

        assert!(selector.is_remote_connected());
        assert_eq!(selector.session().unwrap().owner_id.as_str(), "u1");
    }

    #[test]
    fn failure_keeps_fallback_and_records_message() {
        let mut selector = StoreSelector::new();
        selector.begin_connecting();
        selector
            .failed(ActiveStore::Local, "handshake refused")
            .unwrap();

        assert_eq!(selector.status(), ConnectionStatus::Error);
        assert_eq!(selector.last_error(), Some("handshake refused"));
        assert!(!selector.is_remote());

        selector.begin_connecting();
        assert_eq!(selector.last_error(), None);
        selector.connected(session("u2")).unwrap();
        assert_eq!(selector.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn reconnect_from_connected_can_fall_back_to_previous_session() {
        let mut selector = StoreSelector::new();
        selector.begin_connecting();
        selector.connected(session("u1")).unwrap();

        let previous = selector.active().clone();
        selector.begin_connecting();
        selector.failed(previous, "timeout").unwrap();
        assert_eq!(selector.status(), ConnectionStatus::Error);
        assert_eq!(selector.session().unwrap().owner_id.as_str(), "u1");
        assert!(!selector.is_remote_connected());
    }

    #[test]
    fn connected_requires_connecting() {
        let mut selector = StoreSelector::new();
        let err = selector.connected(session("u1")).unwrap_err();
        assert_eq!(err.from, ConnectionStatus::Unconfigured);
        assert_eq!(err.to, ConnectionStatus::Connected);

        let err = selector.failed(ActiveStore::Local, "x").unwrap_err();
        assert_eq!(err.to, ConnectionStatus::Error);
    }

    #[test]
    fn reset_returns_to_local_unconfigured() {
        let mut selector = StoreSelector::new();
        selector.begin_connecting();
        selector.connected(session("u1")).unwrap();
        selector.reset_to_local();
        assert_eq!(selector.status(), ConnectionStatus::Unconfigured);
        assert!(!selector.is_remote());
    }
}
