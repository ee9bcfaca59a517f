use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("connection is bad")]
    ConnectionClosed,

    #[error("connection refused another channel")]
    ChannelLimit,

    #[error("channel is closed")]
    ChannelClosed,

    #[error("failed to connect to broker: {0}")]
    Connect(String),

    #[error("broker protocol failure: {0}")]
    Protocol(String),

    #[error("no publish is waiting for a confirmation")]
    NoPendingConfirm,
}

impl BrokerError {
    /// The connection this error came from can no longer be used.
    pub fn is_connection_dead(&self) -> bool {
        matches!(self, BrokerError::ConnectionClosed)
    }
}
