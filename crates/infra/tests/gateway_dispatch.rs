//! FCM dispatcher against a mocked gateway.

use chrono::{Duration, Utc};
use orderpush_core::{DeviceToken, DispatchOutcome, ErrorClass, OrderId};
use orderpush_infra::{AccessToken, FcmDispatcher, NotificationDispatcher, WebpushOptions};
use secrecy::SecretString;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SEND_PATH: &str = "/v1/projects/demo/messages:send";

fn token() -> AccessToken {
    AccessToken::new(
        SecretString::from("bearer-123".to_string()),
        Utc::now() + Duration::minutes(30),
    )
}

fn device() -> DeviceToken {
    DeviceToken::parse("device-token-xyz").unwrap()
}

fn dispatcher(server: &MockServer) -> FcmDispatcher {
    let http = orderpush_infra::http::build_client(
        std::time::Duration::from_secs(2),
        std::time::Duration::from_secs(5),
    )
    .unwrap();
    FcmDispatcher::new(http, &server.uri(), "demo", WebpushOptions::default())
}

#[tokio::test]
async fn accepted_message_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .and(header("authorization", "Bearer bearer-123"))
        .and(body_partial_json(serde_json::json!({
            "message": {
                "token": "device-token-xyz",
                "notification": { "title": "Seu pedido #9 está pronto para retirada!" }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "projects/demo/messages/0:123"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = dispatcher(&server)
        .dispatch(&token(), &device(), OrderId::new(9), " r ")
        .await;
    assert_eq!(outcome, DispatchOutcome::Sent);
}

#[tokio::test]
async fn unknown_order_type_never_reaches_the_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = dispatcher(&server)
        .dispatch(&token(), &device(), OrderId::new(1), "X")
        .await;
    assert_eq!(outcome.error_class(), Some(ErrorClass::InvalidInput));
}

#[tokio::test]
async fn unregistered_device_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": {
                "code": 404,
                "message": "Requested entity was not found.",
                "status": "NOT_FOUND",
                "details": [{ "errorCode": "UNREGISTERED" }]
            }
        })))
        .mount(&server)
        .await;

    let outcome = dispatcher(&server)
        .dispatch(&token(), &device(), OrderId::new(2), "E")
        .await;
    assert_eq!(outcome.error_class(), Some(ErrorClass::PermanentTarget));
}

#[tokio::test]
async fn server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&server)
        .await;

    let outcome = dispatcher(&server)
        .dispatch(&token(), &device(), OrderId::new(3), "E")
        .await;
    assert_eq!(outcome.error_class(), Some(ErrorClass::TransientInfra));
}

#[tokio::test]
async fn malformed_success_body_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let outcome = dispatcher(&server)
        .dispatch(&token(), &device(), OrderId::new(4), "E")
        .await;
    assert_eq!(outcome.error_class(), Some(ErrorClass::TransientInfra));
}

#[tokio::test]
async fn timeout_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"name": "late"}))
                .set_delay(std::time::Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let http = orderpush_infra::http::build_client(
        std::time::Duration::from_millis(200),
        std::time::Duration::from_millis(300),
    )
    .unwrap();
    let dispatcher = FcmDispatcher::new(http, &server.uri(), "demo", WebpushOptions::default());

    let outcome = dispatcher
        .dispatch(&token(), &device(), OrderId::new(5), "E")
        .await;
    assert_eq!(outcome.error_class(), Some(ErrorClass::TransientInfra));
}
