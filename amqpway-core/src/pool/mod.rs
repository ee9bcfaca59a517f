//! Pooled broker connections and confirming sessions.

mod connection;
mod error;
#[allow(clippy::module_inception)]
mod pool;
mod publish;
mod session;
mod stats;
mod wait_queue;

#[cfg(test)]
mod tests;

pub use connection::{CloseError, Connection, ConnectionId};
pub use error::PoolError;
pub use pool::ConnectionPool;
pub use publish::MAX_PUBLISH_ATTEMPTS;
pub use session::Session;
pub use stats::{PoolHealth, PoolStats};
pub use wait_queue::{WaitQueue, WaiterId};
