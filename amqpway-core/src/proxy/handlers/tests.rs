use crate::broker::BrokerError;
use crate::pool::PoolError;
use crate::proxy::handlers::publish::{Endpoint, Target, error_status, parse_target};
use http::StatusCode;
use pretty_assertions::assert_eq;
use std::time::Duration;

#[test]
fn endpoints_parse_by_exact_path() {
    assert_eq!("/confirm_send".parse::<Endpoint>(), Ok(Endpoint::ConfirmSend));
    assert_eq!("/stats".parse::<Endpoint>(), Ok(Endpoint::Stats));
    assert_eq!("/health".parse::<Endpoint>(), Ok(Endpoint::Health));
    assert!("/confirm_send/".parse::<Endpoint>().is_err());
    assert!("/".parse::<Endpoint>().is_err());
}

#[test]
fn parse_target_trims_and_decodes() {
    // Arrange
    let query = Some("exchange=%20orders%20&routingKey=eu.created+now");

    // Act
    let target = parse_target(query).unwrap();

    // Assert
    assert_eq!(
        target,
        Target {
            exchange: "orders".to_string(),
            routing_key: "eu.created now".to_string(),
        }
    );
}

#[test]
fn parse_target_requires_exchange_first() {
    assert_eq!(parse_target(None), Err("exchange param empty"));
    assert_eq!(
        parse_target(Some("exchange=+++&routingKey=k")),
        Err("exchange param empty")
    );
}

#[test]
fn parse_target_requires_routing_key() {
    assert_eq!(
        parse_target(Some("exchange=orders")),
        Err("routingKey param empty")
    );
    // Keys are case sensitive.
    assert_eq!(
        parse_target(Some("exchange=orders&routingkey=k")),
        Err("routingKey param empty")
    );
}

#[test]
fn pool_state_errors_map_to_service_unavailable() {
    assert_eq!(error_status(&PoolError::PoolClosed), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        error_status(&PoolError::Overloaded { waiting: 3 }),
        StatusCode::SERVICE_UNAVAILABLE
    );
    assert_eq!(
        error_status(&PoolError::AcquireTimeout(Duration::from_millis(5))),
        StatusCode::SERVICE_UNAVAILABLE
    );
}

#[test]
fn broker_errors_map_to_bad_gateway() {
    assert_eq!(error_status(&PoolError::NotAcknowledged), StatusCode::BAD_GATEWAY);
    assert_eq!(
        error_status(&PoolError::Publish {
            attempts: 5,
            source: BrokerError::ChannelClosed,
        }),
        StatusCode::BAD_GATEWAY
    );
    assert_eq!(
        error_status(&PoolError::Dial(BrokerError::Connect("refused".into()))),
        StatusCode::BAD_GATEWAY
    );
}
