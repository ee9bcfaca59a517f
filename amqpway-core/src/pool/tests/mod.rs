mod acquire_tests;

use crate::broker::{Broker, BrokerConnection, MemoryBroker};
use crate::conf::PoolConfig;
use crate::pool::{ConnectionId, ConnectionPool, Session};
use std::sync::Arc;
use std::time::Duration;

fn pool_config(
    max_connections: usize,
    max_channels_per_connection: usize,
    max_idle_channels: usize,
    min_connections: usize,
) -> PoolConfig {
    PoolConfig {
        max_channels_per_connection,
        max_idle_channels,
        max_connections,
        min_connections,
        ..PoolConfig::default()
    }
}

fn new_pool(broker: &MemoryBroker, config: PoolConfig) -> Arc<ConnectionPool> {
    ConnectionPool::new(config, Arc::new(broker.clone()))
}

/// Give spawned tasks, the delayed-close worker included, time to run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

/// A session on a fresh broker connection, tagged with `id`.
async fn detached_session(broker: &MemoryBroker, id: u64) -> Session {
    let conn: Box<dyn BrokerConnection> = broker.connect().await.unwrap();
    Session::new(ConnectionId(id), conn.open_channel().await.unwrap())
}
