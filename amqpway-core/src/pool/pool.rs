use crate::broker::{Broker, BrokerChannel, BrokerConnection, BrokerError};
use crate::conf::PoolConfig;
use crate::pool::connection::ReserveError;
use crate::pool::wait_queue::WaiterId;
use crate::pool::{Connection, ConnectionId, PoolError, PoolHealth, PoolStats, Session, WaitQueue};
use crate::sync::lock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Multiplexes many short-lived publishers over a bounded set of broker
/// connections and their sessions.
///
/// Invariants:
/// - live connections plus in-flight dials never exceed `max_connections`
/// - no connection holds more than `max_channels_per_connection` sessions
/// - the idle cache never holds more than `max_idle_channels` sessions
/// - once closed, the pool stays closed
///
/// The pool lock is never held across an `.await`: capacity is reserved under
/// the lock and the network round trip happens after it is released.
pub struct ConnectionPool {
    config: PoolConfig,
    broker: Arc<dyn Broker>,
    state: Mutex<PoolState>,
    waiters: WaitQueue,
    busy: AtomicUsize,
    next_connection_id: AtomicU64,
    delayed_close: Mutex<Option<JoinHandle<()>>>,
}

struct PoolState {
    connections: Vec<Arc<Connection>>,
    pending_dials: usize,
    idle: VecDeque<Session>,
    closed: bool,
    last_error: Option<String>,
    /// Sender half of the delayed-close queue. Dropped on shutdown.
    retire_tx: Option<mpsc::UnboundedSender<Retired>>,
}

/// Work for the delayed-close worker.
enum Retired {
    Channel(ConnectionId, Box<dyn BrokerChannel>),
    Connection(Arc<Connection>),
}

/// What one pass of the acquisition loop decided to do.
enum Step<'a> {
    IdleHit(Session),
    Open(Arc<Connection>, Arc<dyn BrokerConnection>),
    Dial,
    Backpressure(PendingWait<'a>),
}

/// Why the acquisition loop goes around again.
#[derive(Debug, Clone, Copy)]
enum Retry {
    CapRace,
    ConnectionEvicted,
    Woken,
}

enum Opened {
    Session(Session),
    Retry(Retry),
}

/// What became of a dial once the pool lock was taken again.
enum Dialed {
    Failed(BrokerError),
    PoolClosed(Box<dyn BrokerConnection>),
    Unusable,
    Ready(Arc<Connection>, Arc<dyn BrokerConnection>),
}

enum WaitOutcome {
    Delivered(Session),
    Woken,
    TimedOut,
}

impl ConnectionPool {
    /// Create a pool and spawn its delayed-close worker on the current Tokio runtime.
    pub fn new(config: PoolConfig, broker: Arc<dyn Broker>) -> Arc<Self> {
        let (retire_tx, retire_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_delayed_close(retire_rx));

        Arc::new(Self {
            state: Mutex::new(PoolState {
                connections: Vec::with_capacity(config.max_connections.min(64)),
                pending_dials: 0,
                idle: VecDeque::with_capacity(config.max_idle_channels.min(1024)),
                closed: false,
                last_error: None,
                retire_tx: Some(retire_tx),
            }),
            config,
            broker,
            waiters: WaitQueue::new(),
            busy: AtomicUsize::new(0),
            next_connection_id: AtomicU64::new(1),
            delayed_close: Mutex::new(Some(worker)),
        })
    }

    /// A copy of the configuration the pool was built with.
    pub fn config(&self) -> PoolConfig {
        self.config.clone()
    }

    pub fn stats(&self) -> PoolStats {
        let state = lock(&self.state);
        PoolStats {
            idle_sessions: state.idle.len(),
            connections: state.connections.len(),
            busy_sessions: self.busy.load(Ordering::SeqCst),
            waiting_requests: self.waiters.len(),
        }
    }

    pub fn health(&self) -> PoolHealth {
        let state = lock(&self.state);
        PoolHealth {
            ready: !state.closed && state.last_error.is_none(),
            closed: state.closed,
            connections: state.connections.len(),
            last_error: state.last_error.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Take a session from the idle cache, open a new one, or wait for one to
    /// be released.
    pub async fn acquire_session(&self) -> Result<Session, PoolError> {
        let deadline = self.config.acquire_timeout().map(|t| Instant::now() + t);
        // Place in the wait queue, kept across wake-ups.
        let mut ticket = None;

        loop {
            let retry = match self.next_step(ticket)? {
                Step::IdleHit(session) => return Ok(session),

                Step::Open(conn, handle) => match self.open_on(&conn, handle).await? {
                    Opened::Session(session) => return Ok(session),
                    Opened::Retry(retry) => retry,
                },

                Step::Dial => match self.dial().await? {
                    Some((conn, handle)) => match self.open_on(&conn, handle).await? {
                        Opened::Session(session) => return Ok(session),
                        Opened::Retry(retry) => retry,
                    },
                    None => Retry::ConnectionEvicted,
                },

                Step::Backpressure(wait) => {
                    ticket = Some(wait.id);
                    match wait.wait(deadline).await {
                        WaitOutcome::Delivered(session) => return Ok(session),
                        WaitOutcome::Woken => Retry::Woken,
                        WaitOutcome::TimedOut => {
                            return Err(PoolError::AcquireTimeout(
                                self.config.acquire_timeout().unwrap_or_default(),
                            ));
                        }
                    }
                }
            };

            tracing::debug!(retry = ?retry, "retrying session acquisition");
        }
    }

    /// Open a session on a reserved slot. Failures that a different
    /// connection could avoid turn into a retry.
    async fn open_on(
        &self,
        conn: &Arc<Connection>,
        handle: Arc<dyn BrokerConnection>,
    ) -> Result<Opened, PoolError> {
        let mut reserved = Reserved {
            pool: self,
            conn: conn.as_ref(),
            armed: true,
        };
        let opened = conn.open_session(handle).await;
        // open_session gives the slot back itself when it fails.
        reserved.armed = false;

        match opened {
            Ok(session) => {
                self.busy.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(connection_id = %conn.id(), "session opened");
                Ok(Opened::Session(session))
            }
            Err(err) if err.is_connection_dead() => {
                tracing::warn!(connection_id = %conn.id(), error = %err, "evicting bad connection");
                self.remove_connection(conn).await;
                Ok(Opened::Retry(Retry::ConnectionEvicted))
            }
            Err(BrokerError::ChannelLimit) => {
                let open = conn.limit_capacity();
                tracing::warn!(connection_id = %conn.id(), open, "broker refused another channel");
                if open == 0 {
                    self.remove_connection(conn).await;
                }
                Ok(Opened::Retry(Retry::CapRace))
            }
            Err(err) => {
                // The reserved slot went back to the connection.
                self.waiters.wake_one();
                Err(PoolError::Broker(err))
            }
        }
    }

    /// Decide, under the pool lock, how to get a session. A caller holding a
    /// `ticket` from an earlier wait goes back to its old place in line.
    fn next_step(&self, ticket: Option<WaiterId>) -> Result<Step<'_>, PoolError> {
        let mut state = lock(&self.state);

        if state.closed {
            return Err(PoolError::PoolClosed);
        }

        if let Some(step) = self.claim(&mut state) {
            // Capacity can free up faster than waiters wake. Pass the baton on
            // while some is left.
            if !self.waiters.is_empty() && self.has_spare(&state) {
                self.waiters.wake_one();
            }
            return Ok(step);
        }

        // Registered while the pool lock is held, so a release cannot slip in
        // between the capacity check and the registration.
        let (id, rx) = match ticket {
            Some(id) => (id, self.waiters.requeue(id)),
            None => {
                let waiting = self.waiters.len();
                if self.config.max_waiters.is_some_and(|max| waiting >= max) {
                    tracing::warn!(waiting, "wait queue is full, rejecting request");
                    return Err(PoolError::Overloaded { waiting });
                }
                self.waiters.put()
            }
        };
        Ok(Step::Backpressure(PendingWait {
            pool: self,
            id,
            rx,
            settled: false,
        }))
    }

    /// Take an idle session, a free session slot or a free dial slot, in that order.
    fn claim(&self, state: &mut PoolState) -> Option<Step<'_>> {
        while let Some(session) = state.idle.pop_front() {
            if state.is_live(session.connection_id()) {
                self.busy.fetch_add(1, Ordering::SeqCst);
                return Some(Step::IdleHit(session));
            }
            self.probe_close_locked(state, session);
        }

        if let Some((conn, handle)) = self.reserve_slot(state) {
            return Some(Step::Open(conn, handle));
        }

        if state.connections.len() + state.pending_dials < self.config.max_connections {
            state.pending_dials += 1;
            return Some(Step::Dial);
        }

        None
    }

    fn has_spare(&self, state: &PoolState) -> bool {
        let max_channels = self.config.max_channels_per_connection;
        !state.idle.is_empty()
            || state.connections.len() + state.pending_dials < self.config.max_connections
            || state.connections.iter().any(|c| c.has_room(max_channels))
    }

    /// Reserve a session slot on the first live connection with room. Dead
    /// connections met on the way are evicted.
    fn reserve_slot(
        &self,
        state: &mut PoolState,
    ) -> Option<(Arc<Connection>, Arc<dyn BrokerConnection>)> {
        let mut reserved = None;
        let mut dead = Vec::new();

        for conn in &state.connections {
            match conn.try_reserve(self.config.max_channels_per_connection) {
                Ok(handle) => {
                    reserved = Some((conn.clone(), handle));
                    break;
                }
                Err(ReserveError::Full) => continue,
                Err(ReserveError::Dead) => dead.push(conn.clone()),
            }
        }

        for conn in dead {
            tracing::warn!(connection_id = %conn.id(), "evicting dead connection");
            self.detach_locked(state, &conn);
        }

        reserved
    }

    /// Dial a new connection on a slot reserved by `next_step` and reserve its
    /// first session slot. `None` when the fresh connection is already unusable.
    async fn dial(
        &self,
    ) -> Result<Option<(Arc<Connection>, Arc<dyn BrokerConnection>)>, PoolError> {
        let mut pending = PendingDial {
            pool: self,
            armed: true,
        };
        let dialed = self.broker.connect().await;
        pending.armed = false;

        let outcome = {
            let mut state = lock(&self.state);
            state.pending_dials -= 1;
            self.admit_locked(&mut state, dialed)
        };

        match outcome {
            Dialed::Failed(err) => {
                tracing::error!(error = %err, "failed to dial broker");
                // The dial slot is free again.
                self.waiters.wake_one();
                Err(PoolError::Dial(err))
            }
            Dialed::PoolClosed(handle) => {
                if let Err(e) = handle.close().await {
                    tracing::debug!(error = %e, "closing connection dialed during shutdown failed");
                }
                Err(PoolError::PoolClosed)
            }
            Dialed::Unusable => {
                self.waiters.wake_one();
                Ok(None)
            }
            Dialed::Ready(conn, reserved) => {
                tracing::debug!(connection_id = %conn.id(), "connection opened");
                if self.config.max_channels_per_connection > 1 {
                    // The new connection has room for more than this caller.
                    self.waiters.wake_one();
                }
                Ok(Some((conn, reserved)))
            }
        }
    }

    /// Add a freshly dialed connection to the pool with its first session
    /// slot reserved.
    fn admit_locked(
        &self,
        state: &mut PoolState,
        dialed: Result<Box<dyn BrokerConnection>, BrokerError>,
    ) -> Dialed {
        let handle = match dialed {
            Ok(handle) => handle,
            Err(err) => {
                state.last_error = Some(err.to_string());
                return Dialed::Failed(err);
            }
        };

        if state.closed {
            return Dialed::PoolClosed(handle);
        }

        state.last_error = None;
        let id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let conn = Arc::new(Connection::new(id, handle));

        match conn.try_reserve(self.config.max_channels_per_connection) {
            Ok(reserved) => {
                state.connections.push(conn.clone());
                Dialed::Ready(conn, reserved)
            }
            Err(_) => {
                self.retire_locked(state, Retired::Connection(conn));
                Dialed::Unusable
            }
        }
    }

    /// Return a session after use.
    ///
    /// Waiters are served first, then the idle cache; when both are out the
    /// session is probe-closed.
    pub fn release_session(&self, session: Session) {
        let mut state = lock(&self.state);

        if state.closed {
            drop(state);
            self.busy.fetch_sub(1, Ordering::SeqCst);
            self.retire_detached(session);
            return;
        }

        // A delivered session stays busy: it changes hands without an idle stop.
        let session = match self.waiters.notify_one(session) {
            Ok(()) => return,
            Err(session) => session,
        };

        self.busy.fetch_sub(1, Ordering::SeqCst);

        if state.idle.len() < self.config.max_idle_channels {
            state.idle.push_back(session);
            return;
        }

        self.probe_close_locked(&mut state, session);
        drop(state);
        self.waiters.wake_one();
    }

    /// Retire a busy session instead of returning it, e.g. after its channel failed.
    pub fn probe_close(&self, session: Session) {
        self.busy.fetch_sub(1, Ordering::SeqCst);

        let mut state = lock(&self.state);
        if state.closed {
            drop(state);
            self.retire_detached(session);
            return;
        }

        self.probe_close_locked(&mut state, session);
        drop(state);
        self.waiters.wake_one();
    }

    /// Close the session's channel and give its slot back. An emptied
    /// connection above `min_connections` is removed from the pool.
    fn probe_close_locked(&self, state: &mut PoolState, session: Session) {
        let conn_id = session.connection_id();
        let conn = state.find(conn_id);

        self.retire_locked(state, Retired::Channel(conn_id, session.into_channel()));
        tracing::debug!(connection_id = %conn_id, "session closed");

        let Some(conn) = conn else {
            return;
        };

        let remaining = conn.release_slot();
        if remaining == 0 && state.connections.len() > self.config.min_connections {
            self.detach_locked(state, &conn);
        }
    }

    /// Remove a connection from the pool. Teardown is queued for the
    /// delayed-close worker, or done right away once the pool is closed.
    pub async fn remove_connection(&self, conn: &Arc<Connection>) {
        let closed = {
            let mut state = lock(&self.state);
            if state.closed {
                state.connections.retain(|c| c.id() != conn.id());
                true
            } else {
                self.detach_locked(&mut state, conn);
                false
            }
        };

        if closed && let Err(e) = conn.close(true).await {
            tracing::warn!(connection_id = %conn.id(), error = %e, "connection close failed");
        }

        self.waiters.wake_one();
    }

    fn detach_locked(&self, state: &mut PoolState, conn: &Arc<Connection>) {
        let before = state.connections.len();
        state.connections.retain(|c| c.id() != conn.id());
        if state.connections.len() != before {
            tracing::debug!(connection_id = %conn.id(), "connection scheduled for close");
            self.retire_locked(state, Retired::Connection(conn.clone()));
        }
    }

    fn retire_locked(&self, state: &mut PoolState, retired: Retired) {
        if let Some(tx) = &state.retire_tx {
            // Only fails once the worker is gone, and then the pool is closed
            // and every connection has been force-closed anyway.
            let _ = tx.send(retired);
        }
    }

    /// Close a session that outlived the pool. Its connection is already
    /// force-closed, so only the channel is left to tear down.
    fn retire_detached(&self, session: Session) {
        tracing::debug!(
            connection_id = %session.connection_id(),
            "session released after shutdown"
        );
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(session.close());
        }
    }

    /// Shut the pool down. Repeated calls are no-ops.
    ///
    /// Pending waiters are woken and fail with [`PoolError::PoolClosed`];
    /// in-flight acquisitions past the closed check run to completion.
    pub async fn close_all(&self) {
        let (idle, connections) = {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            state.closed = true;
            // Closing the queue lets the worker drain and exit.
            state.retire_tx = None;
            (
                std::mem::take(&mut state.idle),
                std::mem::take(&mut state.connections),
            )
        };

        self.waiters.notify_all();

        let worker = lock(&self.delayed_close).take();
        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            tracing::warn!(error = %e, "delayed-close worker failed");
        }

        for session in idle {
            session.close().await;
        }

        for conn in connections {
            if let Err(e) = conn.close(true).await {
                tracing::warn!(connection_id = %conn.id(), error = %e, "connection close failed");
            }
        }

        tracing::info!("connection pool closed");
    }
}

impl PoolState {
    fn find(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.iter().find(|c| c.id() == id).cloned()
    }

    fn is_live(&self, id: ConnectionId) -> bool {
        self.connections
            .iter()
            .any(|c| c.id() == id && !c.is_dead())
    }
}

/// A registered waiter. Dropping it before it settles cancels the registration,
/// and a session delivered in the meantime goes back to the pool.
struct PendingWait<'a> {
    pool: &'a ConnectionPool,
    id: WaiterId,
    rx: oneshot::Receiver<Session>,
    settled: bool,
}

impl PendingWait<'_> {
    async fn wait(mut self, deadline: Option<Instant>) -> WaitOutcome {
        let received = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, &mut self.rx).await {
                Ok(received) => received,
                Err(_) => return WaitOutcome::TimedOut,
            },
            None => (&mut self.rx).await,
        };

        self.settled = true;
        match received {
            Ok(session) => WaitOutcome::Delivered(session),
            Err(_) => WaitOutcome::Woken,
        }
    }
}

impl Drop for PendingWait<'_> {
    fn drop(&mut self) {
        if self.settled || self.pool.waiters.cancel(self.id) {
            return;
        }

        // Already popped: whatever was sent must not be lost.
        match self.rx.try_recv() {
            Ok(session) => self.pool.release_session(session),
            Err(oneshot::error::TryRecvError::Closed) => {
                self.pool.waiters.wake_one();
            }
            Err(oneshot::error::TryRecvError::Empty) => {}
        }
    }
}

/// A dial slot counted in `pending_dials`. Handed back if the dialing
/// future is dropped.
struct PendingDial<'a> {
    pool: &'a ConnectionPool,
    armed: bool,
}

impl Drop for PendingDial<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock(&self.pool.state).pending_dials -= 1;
            self.pool.waiters.wake_one();
        }
    }
}

/// A session slot reserved on a connection while its channel is being
/// opened. Handed back if the opening future is dropped.
struct Reserved<'a> {
    pool: &'a ConnectionPool,
    conn: &'a Connection,
    armed: bool,
}

impl Drop for Reserved<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.conn.release_slot();
            self.pool.waiters.wake_one();
        }
    }
}

async fn run_delayed_close(mut rx: mpsc::UnboundedReceiver<Retired>) {
    while let Some(retired) = rx.recv().await {
        match retired {
            Retired::Channel(conn_id, mut channel) => {
                if let Err(e) = channel.close().await {
                    tracing::debug!(connection_id = %conn_id, error = %e, "session close failed");
                }
            }
            Retired::Connection(conn) => match conn.close(true).await {
                Ok(()) => tracing::debug!(connection_id = %conn.id(), "connection closed"),
                Err(e) => {
                    tracing::warn!(connection_id = %conn.id(), error = %e, "connection close failed")
                }
            },
        }
    }

    tracing::debug!("delayed-close queue drained");
}
