use crate::broker::{BrokerConnection, BrokerError};
use crate::pool::Session;
use crate::sync::lock;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum CloseError {
    #[error("connection still has {open} open sessions")]
    SessionsStillOpen { open: usize },

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Why a session slot could not be reserved.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum ReserveError {
    Full,
    Dead,
}

/// One physical broker connection and the sessions opened on it.
///
/// Invariants:
/// - `open_sessions` only changes under this connection's own lock
/// - once `handle` is taken the connection is permanently dead
pub struct Connection {
    id: ConnectionId,
    state: Mutex<ConnectionState>,
}

struct ConnectionState {
    handle: Option<Arc<dyn BrokerConnection>>,
    open_sessions: usize,
    /// Lowered when the broker refuses channels before our own limit is hit.
    capacity: Option<usize>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("open_sessions", &state.open_sessions)
            .field("alive", &state.handle.is_some())
            .finish()
    }
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, handle: Box<dyn BrokerConnection>) -> Self {
        Self {
            id,
            state: Mutex::new(ConnectionState {
                handle: Some(Arc::from(handle)),
                open_sessions: 0,
                capacity: None,
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn open_sessions(&self) -> usize {
        lock(&self.state).open_sessions
    }

    /// Closed by us, or dropped by the broker.
    pub fn is_dead(&self) -> bool {
        match &lock(&self.state).handle {
            Some(handle) => !handle.is_connected(),
            None => true,
        }
    }

    /// Claim one session slot below `max` and hand back the broker handle to
    /// open it on. The slot is counted immediately; give it back with
    /// [`Connection::release_slot`] if opening fails.
    pub(crate) fn try_reserve(
        &self,
        max: usize,
    ) -> Result<Arc<dyn BrokerConnection>, ReserveError> {
        let mut state = lock(&self.state);

        let handle = match &state.handle {
            Some(handle) if handle.is_connected() => handle.clone(),
            _ => return Err(ReserveError::Dead),
        };

        let limit = state.capacity.map_or(max, |cap| cap.min(max));
        if state.open_sessions >= limit {
            return Err(ReserveError::Full);
        }

        state.open_sessions += 1;
        Ok(handle)
    }

    /// Live, and `try_reserve` would succeed right now.
    pub(crate) fn has_room(&self, max: usize) -> bool {
        let state = lock(&self.state);
        let alive = state.handle.as_ref().is_some_and(|h| h.is_connected());
        let limit = state.capacity.map_or(max, |cap| cap.min(max));
        alive && state.open_sessions < limit
    }

    /// Give back one session slot. Returns the remaining open-session count.
    pub(crate) fn release_slot(&self) -> usize {
        let mut state = lock(&self.state);
        state.open_sessions = state.open_sessions.saturating_sub(1);
        state.open_sessions
    }

    /// Stop handing out slots beyond what is open right now.
    pub(crate) fn limit_capacity(&self) -> usize {
        let mut state = lock(&self.state);
        state.capacity = Some(state.open_sessions);
        state.open_sessions
    }

    /// Open a confirming session on a slot reserved with [`Connection::try_reserve`].
    pub(crate) async fn open_session(
        &self,
        handle: Arc<dyn BrokerConnection>,
    ) -> Result<Session, BrokerError> {
        let mut channel = match handle.open_channel().await {
            Ok(channel) => channel,
            Err(err) => {
                self.release_slot();
                return Err(err);
            }
        };

        if let Err(err) = channel.enable_confirms().await {
            let _ = channel.close().await;
            self.release_slot();
            return Err(err);
        }

        Ok(Session::new(self.id, channel))
    }

    /// Close the underlying broker connection.
    ///
    /// Without `force` this refuses while sessions are still open. The handle is
    /// dropped even when the broker reports an error on close.
    pub async fn close(&self, force: bool) -> Result<(), CloseError> {
        let handle = {
            let mut state = lock(&self.state);
            if !force && state.open_sessions > 0 {
                return Err(CloseError::SessionsStillOpen {
                    open: state.open_sessions,
                });
            }
            state.handle.take()
        };

        match handle {
            Some(handle) => Ok(handle.close().await?),
            None => Ok(()),
        }
    }
}
