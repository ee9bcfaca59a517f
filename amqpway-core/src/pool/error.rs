use crate::broker::BrokerError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool closed")]
    PoolClosed,

    #[error("message not acked")]
    NotAcknowledged,

    #[error("failed to publish a message after {attempts} attempts: {source}")]
    Publish {
        attempts: usize,
        #[source]
        source: BrokerError,
    },

    #[error("failed to dial broker: {0}")]
    Dial(#[source] BrokerError),

    #[error("broker failure: {0}")]
    Broker(#[source] BrokerError),

    #[error("no session became free within {0:?}")]
    AcquireTimeout(Duration),

    #[error("too many requests waiting for a session ({waiting})")]
    Overloaded { waiting: usize },

    #[error("broker did not confirm the message within {0:?}")]
    ConfirmTimeout(Duration),
}

impl PoolError {
    /// The pool refused the request because of its own state rather than
    /// because the broker failed.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            PoolError::PoolClosed | PoolError::Overloaded { .. } | PoolError::AcquireTimeout(_)
        )
    }
}
