use integration_tests::harness::{TestServer, captured_events};
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use reqwest::header::ALLOW;
use std::thread;
use std::time::Duration;

#[test]
fn confirm_send_publishes_message() {
    // Arrange
    let srv = TestServer::start("basic");

    // Act
    let res = srv
        .confirm_send("orders", "created", r#"{"id":42}"#)
        .send()
        .unwrap();

    // Assert
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().unwrap(), "OK");

    let published = srv.broker().published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].exchange, "orders");
    assert_eq!(published[0].routing_key, "created");
    assert_eq!(published[0].payload, br#"{"id":42}"#.to_vec());
}

#[test]
fn confirm_send_accepts_put() {
    // Arrange
    let srv = TestServer::start("basic");

    // Act
    let res = srv
        .put("/confirm_send?exchange=orders&routingKey=updated")
        .body("payload")
        .send()
        .unwrap();

    // Assert
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(srv.broker().published()[0].routing_key, "updated");
}

#[test]
fn confirm_send_trims_query_params() {
    // Arrange
    let srv = TestServer::start("basic");

    // Act
    let res = srv
        .post("/confirm_send?exchange=%20orders%20&routingKey=%20created")
        .body("payload")
        .send()
        .unwrap();

    // Assert
    assert_eq!(res.status(), StatusCode::OK);
    let published = srv.broker().published();
    assert_eq!(published[0].exchange, "orders");
    assert_eq!(published[0].routing_key, "created");
}

#[test]
fn confirm_send_rejects_other_methods() {
    // Arrange
    let srv = TestServer::start("basic");

    // Act
    let res = srv
        .get("/confirm_send?exchange=orders&routingKey=created")
        .send()
        .unwrap();

    // Assert
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(res.headers().get(ALLOW).unwrap(), "POST, PUT");
    assert!(srv.broker().published().is_empty());
}

#[test]
fn confirm_send_requires_exchange() {
    // Arrange
    let srv = TestServer::start("basic");

    // Act
    let res = srv
        .post("/confirm_send?routingKey=created")
        .body("payload")
        .send()
        .unwrap();

    // Assert
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(res.text().unwrap(), "exchange param empty");
}

#[test]
fn confirm_send_requires_routing_key() {
    // Arrange
    let srv = TestServer::start("basic");

    // Act
    let res = srv
        .post("/confirm_send?exchange=orders&routingKey=%20")
        .body("payload")
        .send()
        .unwrap();

    // Assert
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(res.text().unwrap(), "routingKey param empty");
}

#[test]
fn confirm_send_requires_body() {
    // Arrange
    let srv = TestServer::start("basic");

    // Act
    let res = srv.confirm_send("orders", "created", "").send().unwrap();

    // Assert
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(res.text().unwrap(), "message body empty");
    assert_eq!(srv.broker().dials(), 0);
}

#[test]
fn nack_is_reported_as_bad_gateway() {
    // Arrange
    let srv = TestServer::start("basic");
    srv.broker().nack_next_publishes(1);

    // Act
    let res = srv.confirm_send("orders", "created", "m").send().unwrap();

    // Assert
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(res.text().unwrap(), "ConfirmSendMsg error: message not acked");
}

#[test]
fn publish_failures_give_up_after_five_attempts() {
    // Arrange
    let srv = TestServer::start("basic");
    srv.broker().fail_next_publishes(5);

    // Act
    let res = srv.confirm_send("orders", "created", "m").send().unwrap();

    // Assert
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert!(
        res.text()
            .unwrap()
            .starts_with("ConfirmSendMsg error: failed to publish a message after 5 attempts")
    );
    assert!(srv.broker().published().is_empty());

    let attempts: Vec<String> = captured_events()
        .iter()
        .filter(|e| e.message() == Some("publish failed"))
        .filter_map(|e| e.field("attempt").map(str::to_string))
        .collect();
    assert!(attempts.contains(&"5".to_string()), "{attempts:?}");
    assert!(!attempts.contains(&"6".to_string()));
}

#[test]
fn closed_pool_is_service_unavailable() {
    // Arrange
    let srv = TestServer::start("basic");
    srv.close_pool();

    // Act
    let res = srv.confirm_send("orders", "created", "m").send().unwrap();

    // Assert
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.text().unwrap(), "ConfirmSendMsg error: pool closed");
}

#[test]
fn second_publisher_times_out_while_the_only_session_is_busy() {
    // Arrange
    let srv = TestServer::start("bounded");
    srv.broker().hold_confirms();
    let first = {
        let request = srv.confirm_send("orders", "first", "1");
        thread::spawn(move || request.send().unwrap().status())
    };
    thread::sleep(Duration::from_millis(100));

    // Act
    let blocked = srv.confirm_send("orders", "second", "2").send().unwrap();
    srv.broker().resume_confirms();
    let first_status = first.join().unwrap();
    let after = srv.confirm_send("orders", "third", "3").send().unwrap();

    // Assert
    assert_eq!(blocked.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(blocked.text().unwrap().starts_with("ConfirmSendMsg error: no session became free"));
    assert_eq!(first_status, StatusCode::OK);
    assert_eq!(after.status(), StatusCode::OK);
    assert_eq!(srv.broker().dials(), 1);
}

#[test]
fn unknown_path_is_not_found() {
    // Arrange
    let srv = TestServer::start("basic");

    // Act
    let res = srv.get("/publish").send().unwrap();

    // Assert
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
