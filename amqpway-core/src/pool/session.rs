use crate::broker::{BrokerChannel, BrokerError, Confirmation};
use crate::pool::ConnectionId;
use std::fmt;

/// A confirming channel on one pooled connection.
///
/// A session is never shared: it is moved into the caller while busy, into
/// the idle cache while idle, and into the delayed-close queue when retiring.
pub struct Session {
    connection: ConnectionId,
    channel: Box<dyn BrokerChannel>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(connection: ConnectionId, channel: Box<dyn BrokerChannel>) -> Self {
        Self {
            connection,
            channel,
        }
    }

    /// The connection this session was opened on. Resolve it through the pool.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    pub async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        self.channel.publish(exchange, routing_key, payload).await
    }

    pub async fn wait_confirm(&mut self) -> Result<Confirmation, BrokerError> {
        self.channel.wait_confirm().await
    }

    pub(crate) fn into_channel(self) -> Box<dyn BrokerChannel> {
        self.channel
    }

    /// Close the channel. Close errors only matter to the broker, so they are logged.
    pub(crate) async fn close(self) {
        let connection = self.connection;
        let mut channel = self.channel;
        if let Err(e) = channel.close().await {
            tracing::debug!(connection_id = %connection, error = %e, "session close failed");
        }
    }
}
