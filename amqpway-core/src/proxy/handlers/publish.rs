use crate::pool::{ConnectionPool, PoolError};
use bytes::BytesMut;
use http::{Method, StatusCode, header};
use pingora::prelude::Session;
use pingora::{Custom, Error};
use pingora_http::ResponseHeader;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, PartialEq)]
pub(crate) enum Endpoint {
    ConfirmSend,
    Stats,
    Health,
}

impl FromStr for Endpoint {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "/confirm_send" => Ok(Endpoint::ConfirmSend),
            "/stats" => Ok(Endpoint::Stats),
            "/health" => Ok(Endpoint::Health),
            _ => Err("unknown endpoint"),
        }
    }
}

/// Where a message goes, taken from the query string.
#[derive(Debug, PartialEq)]
pub(crate) struct Target {
    pub exchange: String,
    pub routing_key: String,
}

/// Read `exchange` and `routingKey` from a query string. Both are trimmed and
/// must be non-empty.
pub(crate) fn parse_target(query: Option<&str>) -> Result<Target, &'static str> {
    let mut exchange = String::new();
    let mut routing_key = String::new();

    for (key, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
        match key.as_ref() {
            "exchange" => exchange = value.trim().to_string(),
            "routingKey" => routing_key = value.trim().to_string(),
            _ => {}
        }
    }

    if exchange.is_empty() {
        return Err("exchange param empty");
    }
    if routing_key.is_empty() {
        return Err("routingKey param empty");
    }

    Ok(Target {
        exchange,
        routing_key,
    })
}

/// Status code for a failed publish.
pub(crate) fn error_status(err: &PoolError) -> StatusCode {
    if err.is_unavailable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::BAD_GATEWAY
    }
}

pub struct PublishHandler {
    pool: Arc<ConnectionPool>,
}

impl PublishHandler {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    pub(crate) async fn handle(&self, session: &mut Session, path: &str) -> pingora::Result<bool> {
        let Ok(endpoint) = path.parse::<Endpoint>() else {
            self.send_text_response(session, StatusCode::NOT_FOUND, "not found")
                .await?;
            return Ok(true);
        };

        match endpoint {
            Endpoint::Stats => {
                let body = serde_json::to_vec(&self.pool.stats())
                    .map_err(|_| Error::new(Custom("json serialization failed")))?;

                self.send_json_response(session, StatusCode::OK, body)
                    .await?;
                Ok(true)
            }

            Endpoint::Health => {
                let health = self.pool.health();
                let status = if health.ready {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                let body = serde_json::to_vec(&health)
                    .map_err(|_| Error::new(Custom("json serialization failed")))?;

                self.send_json_response(session, status, body).await?;
                Ok(true)
            }

            Endpoint::ConfirmSend => {
                let method = session.req_header().method.clone();

                // Return early when not a POST or PUT request.
                if method != Method::POST && method != Method::PUT {
                    let mut resp = ResponseHeader::build(StatusCode::METHOD_NOT_ALLOWED, None)?;
                    resp.insert_header(header::ALLOW, "POST, PUT")?;
                    resp.insert_header(header::CONTENT_LENGTH, "0")?;
                    session.write_response_header(Box::new(resp), true).await?;
                    return Ok(true);
                }

                self.confirm_send(session).await?;
                Ok(true)
            }
        }
    }

    async fn confirm_send(&self, session: &mut Session) -> pingora::Result<()> {
        let target = match parse_target(session.req_header().uri.query()) {
            Ok(target) => target,
            Err(reason) => {
                return self
                    .send_text_response(session, StatusCode::BAD_REQUEST, reason)
                    .await;
            }
        };

        let mut body = BytesMut::new();
        while let Some(chunk) = session.read_request_body().await? {
            body.extend_from_slice(&chunk);
        }

        if body.is_empty() {
            return self
                .send_text_response(session, StatusCode::BAD_REQUEST, "message body empty")
                .await;
        }

        match self
            .pool
            .confirm_send(&target.exchange, &target.routing_key, &body)
            .await
        {
            Ok(()) => {
                self.send_text_response(session, StatusCode::OK, "OK")
                    .await
            }
            Err(err) => {
                tracing::warn!(
                    exchange = %target.exchange,
                    routing_key = %target.routing_key,
                    error = %err,
                    "confirm_send failed"
                );
                let message = format!("ConfirmSendMsg error: {err}");
                self.send_text_response(session, error_status(&err), &message)
                    .await
            }
        }
    }

    async fn send_json_response(
        &self,
        session: &mut Session,
        status: StatusCode,
        body: Vec<u8>,
    ) -> pingora::Result<()> {
        self.send_response(session, status, "application/json", body)
            .await
    }

    async fn send_text_response(
        &self,
        session: &mut Session,
        status: StatusCode,
        body: &str,
    ) -> pingora::Result<()> {
        self.send_response(session, status, "text/plain; charset=utf-8", body.as_bytes().to_vec())
            .await
    }

    async fn send_response(
        &self,
        session: &mut Session,
        status: StatusCode,
        content_type: &'static str,
        body: Vec<u8>,
    ) -> pingora::Result<()> {
        let mut resp = ResponseHeader::build(status, None)?;
        resp.insert_header(header::CONTENT_TYPE, content_type)?;
        resp.insert_header(header::CONTENT_LENGTH, body.len().to_string())?;

        session.write_response_header(Box::new(resp), false).await?;
        session.write_response_body(Some(body.into()), true).await?;

        Ok(())
    }
}
