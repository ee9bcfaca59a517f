use crate::broker::MemoryBroker;
use crate::conf::PoolConfig;
use crate::pool::tests::{new_pool, pool_config, settle};
use crate::pool::{PoolError, PoolStats};
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::task::JoinSet;

#[tokio::test]
async fn first_acquire_dials_a_connection() {
    // Arrange
    let broker = MemoryBroker::new();
    let pool = new_pool(&broker, pool_config(2, 2, 2, 1));

    // Act
    let _session = pool.acquire_session().await.unwrap();

    // Assert
    assert_eq!(broker.dials(), 1);
    assert_eq!(
        pool.stats(),
        PoolStats {
            idle_sessions: 0,
            connections: 1,
            busy_sessions: 1,
            waiting_requests: 0,
        }
    );
    assert!(pool.health().ready);
}

#[tokio::test]
async fn sessions_share_a_connection_up_to_its_channel_limit() {
    // Arrange
    let broker = MemoryBroker::new();
    let pool = new_pool(&broker, pool_config(3, 2, 4, 1));

    // Act
    let _a = pool.acquire_session().await.unwrap();
    let _b = pool.acquire_session().await.unwrap();
    let after_two = pool.stats().connections;
    let _c = pool.acquire_session().await.unwrap();

    // Assert
    assert_eq!(after_two, 1);
    assert_eq!(pool.stats().connections, 2);
    assert_eq!(broker.dials(), 2);
    assert_eq!(broker.open_channels(), 3);
}

#[tokio::test]
async fn idle_session_is_reused_without_opening_a_channel() {
    // Arrange
    let broker = MemoryBroker::new();
    let pool = new_pool(&broker, pool_config(2, 2, 2, 1));
    let session = pool.acquire_session().await.unwrap();
    pool.release_session(session);

    // Act
    let _session = pool.acquire_session().await.unwrap();

    // Assert
    assert_eq!(broker.open_channels(), 1);
    assert_eq!(pool.stats().idle_sessions, 0);
    assert_eq!(pool.stats().busy_sessions, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquires_respect_every_limit() {
    // Arrange
    let broker = MemoryBroker::new();
    let pool = new_pool(&broker, pool_config(3, 4, 20, 1));
    let mut tasks = JoinSet::new();

    // Act
    for _ in 0..12 {
        let pool = pool.clone();
        tasks.spawn(async move { pool.acquire_session().await });
    }
    let mut sessions = Vec::new();
    while let Some(result) = tasks.join_next().await {
        sessions.push(result.unwrap().unwrap());
    }
    let thirteenth =
        tokio::time::timeout(Duration::from_millis(50), pool.acquire_session()).await;

    // Assert
    assert_eq!(sessions.len(), 12);
    assert_eq!(broker.dials(), 3);
    assert_eq!(broker.open_channels(), 12);
    assert!(thirteenth.is_err(), "pool is saturated");
    assert_eq!(
        pool.stats(),
        PoolStats {
            idle_sessions: 0,
            connections: 3,
            busy_sessions: 12,
            waiting_requests: 0,
        }
    );
}

#[tokio::test]
async fn dial_failure_is_returned_and_pool_stays_usable() {
    // Arrange
    let broker = MemoryBroker::new();
    let pool = new_pool(&broker, pool_config(2, 2, 2, 1));
    broker.refuse_dials(true);

    // Act
    let failed = pool.acquire_session().await;
    let health = pool.health();
    broker.refuse_dials(false);
    let recovered = pool.acquire_session().await;

    // Assert
    assert!(matches!(failed, Err(PoolError::Dial(_))));
    assert!(!health.ready);
    assert!(!health.closed);
    assert!(health.last_error.is_some());
    assert!(recovered.is_ok());
    assert!(pool.health().ready);
    assert_eq!(pool.health().last_error, None);
}

#[tokio::test]
async fn dead_connection_is_evicted_and_replaced() {
    // Arrange
    let broker = MemoryBroker::new();
    let pool = new_pool(&broker, pool_config(2, 4, 4, 1));
    let session = pool.acquire_session().await.unwrap();
    pool.release_session(session);

    // Act
    broker.kill_connections();
    let session = pool.acquire_session().await;
    settle().await;

    // Assert
    assert!(session.is_ok());
    assert_eq!(broker.dials(), 2);
    assert_eq!(broker.open_connections(), 1);
    assert_eq!(pool.stats().connections, 1);
    assert_eq!(pool.stats().idle_sessions, 0);
}

#[tokio::test]
async fn channel_limit_moves_on_to_another_connection() {
    // Arrange
    let broker = MemoryBroker::with_channel_max(1);
    let pool = new_pool(&broker, pool_config(2, 5, 5, 1));
    let _first = pool.acquire_session().await.unwrap();

    // Act
    let second = pool.acquire_session().await;

    // Assert
    assert!(second.is_ok());
    assert_eq!(pool.stats().connections, 2);
    assert_eq!(pool.stats().busy_sessions, 2);
}

#[tokio::test]
async fn acquire_times_out_when_saturated() {
    // Arrange
    let broker = MemoryBroker::new();
    let config = PoolConfig {
        acquire_timeout_ms: Some(30),
        ..pool_config(1, 1, 1, 1)
    };
    let pool = new_pool(&broker, config);
    let _held = pool.acquire_session().await.unwrap();

    // Act
    let result = pool.acquire_session().await;

    // Assert
    assert!(matches!(
        result,
        Err(PoolError::AcquireTimeout(limit)) if limit == Duration::from_millis(30)
    ));
    assert_eq!(pool.stats().waiting_requests, 0);
}

#[tokio::test]
async fn waiters_beyond_ceiling_are_rejected() {
    // Arrange
    let broker = MemoryBroker::new();
    let config = PoolConfig {
        max_waiters: Some(1),
        ..pool_config(1, 1, 1, 1)
    };
    let pool = new_pool(&broker, config);
    let held = pool.acquire_session().await.unwrap();
    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.acquire_session().await }
    });
    settle().await;

    // Act
    let rejected = pool.acquire_session().await;
    pool.release_session(held);
    let served = waiter.await.unwrap();

    // Assert
    assert!(matches!(rejected, Err(PoolError::Overloaded { waiting: 1 })));
    assert!(served.is_ok());
}

#[tokio::test]
async fn dropped_acquire_leaves_no_waiter_behind() {
    // Arrange
    let broker = MemoryBroker::new();
    let pool = new_pool(&broker, pool_config(1, 1, 1, 1));
    let held = pool.acquire_session().await.unwrap();

    // Act
    let abandoned =
        tokio::time::timeout(Duration::from_millis(20), pool.acquire_session()).await;
    let waiting_after_drop = pool.stats().waiting_requests;
    pool.release_session(held);

    // Assert
    assert!(abandoned.is_err());
    assert_eq!(waiting_after_drop, 0);
    assert_eq!(
        pool.stats(),
        PoolStats {
            idle_sessions: 1,
            connections: 1,
            busy_sessions: 0,
            waiting_requests: 0,
        }
    );
}

#[tokio::test]
async fn session_delivered_to_an_aborted_waiter_goes_back_to_the_pool() {
    // Arrange
    let broker = MemoryBroker::new();
    let pool = new_pool(&broker, pool_config(1, 1, 1, 1));
    let held = pool.acquire_session().await.unwrap();
    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.acquire_session().await }
    });
    settle().await;

    // Act
    pool.release_session(held);
    waiter.abort();
    let joined = waiter.await;

    // Assert
    assert!(joined.is_err_and(|e| e.is_cancelled()));
    assert_eq!(
        pool.stats(),
        PoolStats {
            idle_sessions: 1,
            connections: 1,
            busy_sessions: 0,
            waiting_requests: 0,
        }
    );
    assert_eq!(broker.open_channels(), 1);
}

#[tokio::test]
async fn connection_dead_on_arrival_is_retired_and_redialed() {
    // Arrange
    let broker = MemoryBroker::new();
    let pool = new_pool(&broker, pool_config(1, 1, 1, 1));
    broker.dead_next_dials(1);

    // Act
    let session = pool.acquire_session().await;
    settle().await;

    // Assert
    assert!(session.is_ok());
    assert_eq!(broker.dials(), 2);
    assert_eq!(broker.open_connections(), 1);
    assert_eq!(
        pool.stats(),
        PoolStats {
            idle_sessions: 0,
            connections: 1,
            busy_sessions: 1,
            waiting_requests: 0,
        }
    );
}
