//! Session state machine.
//!
//! Status lives in a `watch` channel so `connect()` can wait for the
//! handshake without polling while the listener advances it.

use serde::Serialize;
use tokio::sync::watch;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    Closed,
}

impl ConnectionStatus {
    /// Whether `self → next` is allowed within one connection attempt.
    ///
    /// Any state may fall to `Closed` or be reset to `Disconnected`; a
    /// new attempt may only start from `Disconnected` or `Closed`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionStatus::*;
        if self == next {
            return self != Connecting;
        }
        match (self, next) {
            (_, Closed | Disconnected) => true,
            (Disconnected | Closed, Connecting) => true,
            (Connecting, Authenticating | Ready) => true,
            (Authenticating, Ready) => true,
            _ => false,
        }
    }

    /// No attempt in flight and no live session.
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Disconnected | Self::Closed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Unauthenticated,
    Challenged,
    Authenticated,
    Rejected,
}

/// Public snapshot of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub connection: ConnectionStatus,
    pub auth: AuthStatus,
    /// The gateway never acknowledged the session; requests may still work.
    pub degraded: bool,
}

/// Full state, including the handshake bookkeeping.
#[derive(Debug, Clone)]
pub(crate) struct SessionState {
    pub connection: ConnectionStatus,
    pub auth: AuthStatus,
    pub degraded: bool,
    /// Released by a challenge, acceptance or rejection.
    pub auth_released: bool,
    /// Released by acceptance or rejection.
    pub ack_released: bool,
    /// Id of the `connect` request sent for the current challenge.
    pub connect_request_id: Option<String>,
    pub rejection: Option<String>,
}

impl SessionState {
    fn initial() -> Self {
        Self {
            connection: ConnectionStatus::Disconnected,
            auth: AuthStatus::Unauthenticated,
            degraded: false,
            auth_released: false,
            ack_released: false,
            connect_request_id: None,
            rejection: None,
        }
    }

    pub fn snapshot(&self) -> SessionStatus {
        SessionStatus {
            connection: self.connection,
            auth: self.auth,
            degraded: self.degraded,
        }
    }

    /// Apply a connection transition, refusing illegal ones.
    pub fn transition(&mut self, next: ConnectionStatus) -> bool {
        if !self.connection.can_transition_to(next) {
            tracing::warn!(
                from = %self.connection,
                to = %next,
                "Refusing illegal gateway session transition"
            );
            return false;
        }
        self.connection = next;
        true
    }
}

/// Owner of the session state channel.
pub(crate) struct SessionCell {
    tx: watch::Sender<SessionState>,
}

impl SessionCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::initial());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    pub fn get(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.tx.borrow().snapshot()
    }

    pub fn update(&self, f: impl FnOnce(&mut SessionState)) {
        self.tx.send_modify(f);
    }

    /// Begin a fresh connection attempt. Refused unless idle or closed.
    pub fn begin_attempt(&self) -> bool {
        self.tx.send_if_modified(|s| {
            if !s.transition(ConnectionStatus::Connecting) {
                return false;
            }
            s.auth = AuthStatus::Unauthenticated;
            s.degraded = false;
            s.auth_released = false;
            s.ack_released = false;
            s.connect_request_id = None;
            s.rejection = None;
            true
        })
    }

    /// A challenge was answered with a `connect` request.
    pub fn challenged(&self, connect_request_id: String) {
        self.update(|s| {
            if s.auth != AuthStatus::Rejected {
                s.auth = AuthStatus::Challenged;
            }
            if s.connection == ConnectionStatus::Connecting {
                s.transition(ConnectionStatus::Authenticating);
            }
            s.connect_request_id = Some(connect_request_id);
            s.auth_released = true;
        });
    }

    /// The gateway accepted the session.
    pub fn accepted(&self) {
        self.update(|s| {
            if s.auth == AuthStatus::Rejected {
                return;
            }
            s.auth = AuthStatus::Authenticated;
            s.degraded = false;
            s.transition(ConnectionStatus::Ready);
            s.auth_released = true;
            s.ack_released = true;
        });
    }

    /// The gateway refused the session.
    pub fn rejected(&self, reason: String) {
        self.update(|s| {
            s.auth = AuthStatus::Rejected;
            s.rejection = Some(reason);
            s.auth_released = true;
            s.ack_released = true;
        });
    }

    pub fn is_connect_request(&self, id: &str) -> bool {
        self.tx.borrow().connect_request_id.as_deref() == Some(id)
    }

    pub fn closed(&self) {
        self.update(|s| {
            s.transition(ConnectionStatus::Closed);
        });
    }

    /// Back to `disconnected`/`unauthenticated`.
    pub fn reset(&self) {
        self.tx.send_replace(SessionState::initial());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_cannot_reconnect_without_closing() {
        use ConnectionStatus::*;
        assert!(!Ready.can_transition_to(Connecting));
        assert!(Ready.can_transition_to(Closed));
        assert!(Closed.can_transition_to(Connecting));
        assert!(!Closed.can_transition_to(Ready));
        assert!(!Disconnected.can_transition_to(Ready));
        assert!(Authenticating.can_transition_to(Disconnected));
        assert!(!Connecting.can_transition_to(Connecting));
        assert!(!Authenticating.can_transition_to(Connecting));
        assert!(Ready.can_transition_to(Ready));
    }

    #[test]
    fn begin_attempt_refused_while_handshaking() {
        let cell = SessionCell::new();
        assert!(cell.begin_attempt());
        assert!(!cell.begin_attempt());

        cell.challenged("c1".into());
        assert!(!cell.begin_attempt());
        let state = cell.get();
        assert_eq!(state.connection, ConnectionStatus::Authenticating);
        assert!(cell.is_connect_request("c1"));
    }

    #[test]
    fn begin_attempt_refused_while_ready() {
        let cell = SessionCell::new();
        assert!(cell.begin_attempt());
        cell.accepted();
        assert_eq!(cell.status().connection, ConnectionStatus::Ready);
        assert!(!cell.begin_attempt());
        assert_eq!(cell.status().connection, ConnectionStatus::Ready);

        cell.closed();
        assert!(cell.begin_attempt());
        assert_eq!(cell.status().auth, AuthStatus::Unauthenticated);
    }

    #[test]
    fn challenge_then_accept() {
        let cell = SessionCell::new();
        cell.begin_attempt();
        cell.challenged("c1".into());
        let state = cell.get();
        assert_eq!(state.connection, ConnectionStatus::Authenticating);
        assert_eq!(state.auth, AuthStatus::Challenged);
        assert!(state.auth_released && !state.ack_released);
        assert!(cell.is_connect_request("c1"));

        cell.accepted();
        let state = cell.get();
        assert_eq!(state.connection, ConnectionStatus::Ready);
        assert_eq!(state.auth, AuthStatus::Authenticated);
        assert!(state.ack_released);
    }

    #[test]
    fn rejection_is_sticky_within_attempt() {
        let cell = SessionCell::new();
        cell.begin_attempt();
        cell.rejected("bad token".into());
        cell.accepted();
        assert_eq!(cell.status().auth, AuthStatus::Rejected);
        assert_ne!(cell.status().connection, ConnectionStatus::Ready);
    }

    #[test]
    fn reset_returns_to_disconnected() {
        let cell = SessionCell::new();
        cell.begin_attempt();
        cell.accepted();
        cell.reset();
        assert_eq!(
            cell.status(),
            SessionStatus {
                connection: ConnectionStatus::Disconnected,
                auth: AuthStatus::Unauthenticated,
                degraded: false,
            }
        );
    }
}
