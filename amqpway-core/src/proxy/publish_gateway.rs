use crate::pool::ConnectionPool;
use crate::proxy::handlers::PublishHandler;
use async_trait::async_trait;
use pingora::prelude::{HttpPeer, ProxyHttp, Session};
use pingora::{Custom, Error};
use std::sync::Arc;

/// Front door of the proxy. Every request is answered locally from the pool.
pub struct PublishGateway {
    handler: PublishHandler,
}

impl PublishGateway {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            handler: PublishHandler::new(pool),
        }
    }
}

#[async_trait]
impl ProxyHttp for PublishGateway {
    type CTX = ();

    fn new_ctx(&self) -> Self::CTX {}

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> pingora::Result<Box<HttpPeer>> {
        // request_filter always answers, so nothing is ever proxied.
        Err(Error::new(Custom(
            "PublishGateway attempted to proxy upstream (bug)",
        )))
    }

    async fn request_filter(
        &self,
        session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> pingora::Result<bool> {
        let path = session.req_header().uri.path().to_owned();
        self.handler.handle(session, &path).await
    }
}
