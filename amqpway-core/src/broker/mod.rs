//! The seam between the pool and a concrete broker client.
//!
//! The pool only ever sees these traits. Production wires in [`AmqpBroker`];
//! the test suites use the in-process [`MemoryBroker`].

mod amqp;
mod error;

#[cfg(any(test, feature = "memory-broker"))]
mod memory;


pub use amqp::AmqpBroker;
pub use error::BrokerError;

#[cfg(any(test, feature = "memory-broker"))]
pub use memory::{MemoryBroker, PublishedMessage};

use async_trait::async_trait;

/// Broker-side answer to a message published in confirmation mode.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Confirmation {
    Ack,
    Nack,
}

impl Confirmation {
    pub fn is_ack(self) -> bool {
        matches!(self, Confirmation::Ack)
    }
}

/// Dials physical connections to the broker.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn BrokerConnection>, BrokerError>;
}

/// One physical transport-level link.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Open a new multiplexed channel on this connection.
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;

    fn is_connected(&self) -> bool;
}

/// A multiplexed channel. Publishes one message at a time.
#[async_trait]
pub trait BrokerChannel: Send {
    /// Put the channel into publisher-confirmation mode.
    async fn enable_confirms(&mut self) -> Result<(), BrokerError>;

    /// Publish `payload` as a mandatory, non-immediate, persistent message.
    ///
    /// The broker's confirmation is parked in a single slot until
    /// [`BrokerChannel::wait_confirm`] collects it.
    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BrokerError>;

    /// Wait for the confirmation of the last publish.
    async fn wait_confirm(&mut self) -> Result<Confirmation, BrokerError>;

    async fn close(&mut self) -> Result<(), BrokerError>;
}
