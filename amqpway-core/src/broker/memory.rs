use crate::broker::{Broker, BrokerChannel, BrokerConnection, BrokerError, Confirmation};
use crate::sync::lock;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// A message accepted by a [`MemoryBroker`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
}

/// In-process broker with fault injection.
///
/// Clones share state, so a test can keep a handle while the pool owns another.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    channel_max: Option<usize>,
    dials: AtomicUsize,
    refuse_dials: AtomicBool,
    dead_dials: AtomicUsize,
    fail_publishes: AtomicUsize,
    nack_publishes: AtomicUsize,
    fail_confirms: AtomicUsize,
    hold_confirms: AtomicBool,
    confirm_permits: Semaphore,
    open_channels: AtomicUsize,
    published: Mutex<Vec<PublishedMessage>>,
    links: Mutex<Vec<Arc<Link>>>,
}

#[derive(Debug)]
struct Link {
    open: AtomicBool,
    channels: AtomicUsize,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Each connection refuses channels beyond `max`.
    pub fn with_channel_max(max: usize) -> Self {
        Self::build(Some(max))
    }

    fn build(channel_max: Option<usize>) -> Self {
        Self {
            shared: Arc::new(Shared {
                channel_max,
                dials: AtomicUsize::new(0),
                refuse_dials: AtomicBool::new(false),
                dead_dials: AtomicUsize::new(0),
                fail_publishes: AtomicUsize::new(0),
                nack_publishes: AtomicUsize::new(0),
                fail_confirms: AtomicUsize::new(0),
                hold_confirms: AtomicBool::new(false),
                confirm_permits: Semaphore::new(0),
                open_channels: AtomicUsize::new(0),
                published: Mutex::new(Vec::new()),
                links: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn refuse_dials(&self, refuse: bool) {
        self.shared.refuse_dials.store(refuse, Ordering::SeqCst);
    }

    /// The next `n` dials succeed but hand back connections that are already dropped.
    pub fn dead_next_dials(&self, n: usize) {
        self.shared.dead_dials.store(n, Ordering::SeqCst);
    }

    /// The next `n` publishes fail at the channel.
    pub fn fail_next_publishes(&self, n: usize) {
        self.shared.fail_publishes.store(n, Ordering::SeqCst);
    }

    /// The next `n` accepted publishes are negatively acknowledged.
    pub fn nack_next_publishes(&self, n: usize) {
        self.shared.nack_publishes.store(n, Ordering::SeqCst);
    }

    /// The next `n` confirmation waits fail as if the channel died after the publish.
    pub fn fail_next_confirms(&self, n: usize) {
        self.shared.fail_confirms.store(n, Ordering::SeqCst);
    }

    /// Park every confirmation until [`MemoryBroker::release_confirms`] lets it through.
    pub fn hold_confirms(&self) {
        self.shared.hold_confirms.store(true, Ordering::SeqCst);
    }

    /// Let `n` parked confirmations through.
    pub fn release_confirms(&self, n: usize) {
        self.shared.confirm_permits.add_permits(n);
    }

    /// Stop parking confirmations and flush everything already parked.
    pub fn resume_confirms(&self) {
        self.shared.hold_confirms.store(false, Ordering::SeqCst);
        self.shared.confirm_permits.add_permits(1 << 16);
    }

    /// Simulate the broker dropping every live connection.
    pub fn kill_connections(&self) {
        for link in lock(&self.shared.links).iter() {
            link.open.store(false, Ordering::SeqCst);
        }
    }

    pub fn dials(&self) -> usize {
        self.shared.dials.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        lock(&self.shared.links)
            .iter()
            .filter(|link| link.open.load(Ordering::SeqCst))
            .count()
    }

    pub fn open_channels(&self) -> usize {
        self.shared.open_channels.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.shared.published).clone()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> Result<Box<dyn BrokerConnection>, BrokerError> {
        self.shared.dials.fetch_add(1, Ordering::SeqCst);

        if self.shared.refuse_dials.load(Ordering::SeqCst) {
            return Err(BrokerError::Connect("connection refused".to_string()));
        }

        let link = Arc::new(Link {
            open: AtomicBool::new(!take_one(&self.shared.dead_dials)),
            channels: AtomicUsize::new(0),
        });
        lock(&self.shared.links).push(link.clone());

        Ok(Box::new(MemoryConnection {
            shared: self.shared.clone(),
            link,
        }))
    }
}

struct MemoryConnection {
    shared: Arc<Shared>,
    link: Arc<Link>,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        if !self.link.open.load(Ordering::SeqCst) {
            return Err(BrokerError::ConnectionClosed);
        }

        let max = self.shared.channel_max.unwrap_or(usize::MAX);
        self.link
            .channels
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            })
            .map_err(|_| BrokerError::ChannelLimit)?;
        self.shared.open_channels.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemoryChannel {
            shared: self.shared.clone(),
            link: self.link.clone(),
            confirms: false,
            closed: false,
            pending: None,
        }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.link.open.swap(false, Ordering::SeqCst) {
            return Err(BrokerError::ConnectionClosed);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.link.open.load(Ordering::SeqCst)
    }
}

struct MemoryChannel {
    shared: Arc<Shared>,
    link: Arc<Link>,
    confirms: bool,
    closed: bool,
    pending: Option<Confirmation>,
}

impl MemoryChannel {
    fn usable(&self) -> Result<(), BrokerError> {
        if self.closed || !self.link.open.load(Ordering::SeqCst) {
            return Err(BrokerError::ChannelClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn enable_confirms(&mut self) -> Result<(), BrokerError> {
        self.usable()?;
        self.confirms = true;
        Ok(())
    }

    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        self.usable()?;

        if take_one(&self.shared.fail_publishes) {
            return Err(BrokerError::Protocol("injected publish failure".to_string()));
        }

        lock(&self.shared.published).push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
        });

        self.pending = Some(if take_one(&self.shared.nack_publishes) {
            Confirmation::Nack
        } else {
            Confirmation::Ack
        });
        Ok(())
    }

    async fn wait_confirm(&mut self) -> Result<Confirmation, BrokerError> {
        if !self.confirms {
            return Err(BrokerError::Protocol(
                "channel is not in confirmation mode".to_string(),
            ));
        }
        let confirmation = self.pending.take().ok_or(BrokerError::NoPendingConfirm)?;

        if take_one(&self.shared.fail_confirms) {
            return Err(BrokerError::ChannelClosed);
        }

        if self.shared.hold_confirms.load(Ordering::SeqCst) {
            let permit = self
                .shared
                .confirm_permits
                .acquire()
                .await
                .map_err(|_| BrokerError::ChannelClosed)?;
            permit.forget();
        }

        Ok(confirmation)
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::ChannelClosed);
        }
        self.closed = true;
        self.pending = None;
        self.link.channels.fetch_sub(1, Ordering::SeqCst);
        self.shared.open_channels.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Decrement `counter` if it is non-zero; true when a unit was taken.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}
