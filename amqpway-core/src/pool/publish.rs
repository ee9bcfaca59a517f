use crate::broker::{BrokerError, Confirmation};
use crate::pool::{ConnectionPool, PoolError, Session};

/// How many sessions one message may burn through before the publish fails.
pub const MAX_PUBLISH_ATTEMPTS: usize = 5;

impl ConnectionPool {
    /// Publish one message and wait until the broker confirms it.
    ///
    /// A failed publish retires its session and retries on a fresh one.
    /// Acquisition errors are returned as they are.
    pub async fn confirm_send(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), PoolError> {
        tracing::debug!(exchange, routing_key, stats = ?self.stats(), "confirm_send");

        let mut lease = self.publish_with_retry(exchange, routing_key, payload).await?;

        let confirmed = match self.config().confirm_timeout() {
            Some(limit) => {
                match tokio::time::timeout(limit, lease.session().wait_confirm()).await {
                    Ok(confirmed) => confirmed,
                    Err(_) => {
                        tracing::warn!(exchange, routing_key, "confirmation timed out");
                        lease.retire();
                        return Err(PoolError::ConfirmTimeout(limit));
                    }
                }
            }
            None => lease.session().wait_confirm().await,
        };

        match confirmed {
            Ok(Confirmation::Ack) => {
                lease.release();
                Ok(())
            }
            Ok(Confirmation::Nack) => {
                lease.release();
                Err(PoolError::NotAcknowledged)
            }
            Err(err) => {
                tracing::warn!(exchange, routing_key, error = %err, "confirmation failed");
                lease.retire();
                Err(PoolError::NotAcknowledged)
            }
        }
    }

    async fn publish_with_retry(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<Lease<'_>, PoolError> {
        let mut last_error: Option<BrokerError> = None;

        for attempt in 1..=MAX_PUBLISH_ATTEMPTS {
            let mut lease = Lease {
                pool: self,
                session: Some(self.acquire_session().await?),
            };

            match lease.session().publish(exchange, routing_key, payload).await {
                Ok(()) => return Ok(lease),
                Err(err) => {
                    tracing::warn!(
                        attempt,
                        exchange,
                        routing_key,
                        error = %err,
                        "publish failed"
                    );
                    lease.retire();
                    last_error = Some(err);
                }
            }
        }

        Err(PoolError::Publish {
            attempts: MAX_PUBLISH_ATTEMPTS,
            source: last_error.unwrap_or(BrokerError::ChannelClosed),
        })
    }
}

/// A busy session on its way through one publish. If the publishing future is
/// dropped midway the session is retired, since its channel may still owe a
/// confirmation.
struct Lease<'a> {
    pool: &'a ConnectionPool,
    session: Option<Session>,
}

impl Lease<'_> {
    fn session(&mut self) -> &mut Session {
        self.session
            .as_mut()
            .unwrap_or_else(|| unreachable!("lease used after it was settled"))
    }

    /// Hand the session back for reuse.
    fn release(mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release_session(session);
        }
    }

    /// Close the session instead of reusing it.
    fn retire(mut self) {
        if let Some(session) = self.session.take() {
            self.pool.probe_close(session);
        }
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::debug!(
                connection_id = %session.connection_id(),
                "publish abandoned, retiring session"
            );
            self.pool.probe_close(session);
        }
    }
}
