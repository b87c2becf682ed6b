//! SendGrid provider tests against a local mock of the mail send API.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use secrecy::SecretString;
use serde_json::{json, Value};
use smtp_relay::provider::SendGridProvider;
use smtp_relay::{
    DeliveryError, DeliveryMapper, DeliveryProvider, MessageDecoder, RelayPipeline, RelayState,
    SendRequest,
};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Clone)]
struct MockApi {
    status: StatusCode,
    received: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

async fn mail_send(
    State(api): State<MockApi>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, String) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    api.received.lock().unwrap().push((auth, body));

    let body = if api.status.is_success() {
        String::new()
    } else {
        r#"{"errors":[{"message":"The provided authorization grant is invalid"}]}"#.to_string()
    };
    (api.status, body)
}

/// Serve the mock on an ephemeral port and return its endpoint URL.
async fn start_mock(api: MockApi) -> String {
    let app = Router::new()
        .route("/v3/mail/send", post(mail_send))
        .with_state(api);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/v3/mail/send")
}

fn mock(status: StatusCode) -> MockApi {
    MockApi {
        status,
        received: Arc::new(Mutex::new(Vec::new())),
    }
}

fn send_request(raw: &str) -> SendRequest {
    let email = MessageDecoder::new().decode(raw.as_bytes()).unwrap();
    DeliveryMapper::new()
        .map_to_send_request(&email)
        .unwrap()
        .request
}

#[tokio::test]
async fn test_posts_mail_send_body() {
    let api = mock(StatusCode::ACCEPTED);
    let endpoint = start_mock(api.clone()).await;
    let provider =
        SendGridProvider::new(SecretString::from("SG.test-key")).with_endpoint(endpoint);

    let request = send_request(concat!(
        "From: Alice <a@x.com>\r\n",
        "To: b@y.com\r\n",
        "Cc: Carol <c@z.com>\r\n",
        "Subject: Hi\r\n",
        "\r\n",
        "Hello",
    ));
    let status = provider.send(&request).await.unwrap();
    assert_eq!(status, 202);

    let received = api.received.lock().unwrap();
    assert_eq!(received.len(), 1);
    let (auth, body) = &received[0];
    assert_eq!(auth.as_deref(), Some("Bearer SG.test-key"));
    assert_eq!(
        body,
        &json!({
            "personalizations": [{
                "to": [{ "email": "b@y.com" }],
                "cc": [{ "email": "c@z.com", "name": "Carol" }]
            }],
            "from": { "email": "a@x.com", "name": "Alice" },
            "subject": "Hi",
            "content": [
                { "type": "text/plain", "value": "Hello" },
                { "type": "text/html", "value": "Hello" }
            ]
        })
    );
}

#[tokio::test]
async fn test_rejection_carries_status_and_body() {
    let api = mock(StatusCode::UNAUTHORIZED);
    let endpoint = start_mock(api.clone()).await;
    let provider = SendGridProvider::new(SecretString::from("bad")).with_endpoint(endpoint);

    let request = send_request("From: a@x.com\r\nTo: b@y.com\r\nSubject: Hi\r\n\r\nHello");
    match provider.send(&request).await {
        Err(DeliveryError::Rejected { status, body }) => {
            assert_eq!(status, 401);
            assert!(body.contains("authorization grant is invalid"));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transport_error() {
    // Bind then drop to get a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let provider = SendGridProvider::new(SecretString::from("key"))
        .with_endpoint(format!("http://{addr}/v3/mail/send"));
    let request = send_request("From: a@x.com\r\nTo: b@y.com\r\n\r\nHello");

    assert!(matches!(
        provider.send(&request).await,
        Err(DeliveryError::Transport(_))
    ));
}

#[tokio::test]
async fn test_pipeline_delivers_attachments_through_sendgrid() {
    let api = mock(StatusCode::ACCEPTED);
    let endpoint = start_mock(api.clone()).await;
    let provider: Arc<dyn DeliveryProvider> =
        Arc::new(SendGridProvider::new(SecretString::from("key")).with_endpoint(endpoint));
    let pipeline = RelayPipeline::new(provider);

    let raw = concat!(
        "From: a@x.com\r\n",
        "To: b@y.com\r\n",
        "Subject: Report\r\n",
        "MIME-Version: 1.0\r\n",
        "Content-Type: multipart/mixed; boundary=\"B\"\r\n",
        "\r\n",
        "--B\r\n",
        "Content-Type: text/html\r\n",
        "\r\n",
        "<p>see attached</p>\r\n",
        "--B\r\n",
        "Content-Type: text/csv\r\n",
        "Content-Disposition: attachment; filename=\"report.csv\"\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
        "YSxiCjEsMgo=\r\n",
        "--B--\r\n",
    );
    let outcome = pipeline.relay(raw.as_bytes()).await;
    assert_eq!(outcome.state, RelayState::Delivered);
    assert_eq!(outcome.status, Some(202));
    assert_eq!(outcome.attachment_count, 1);

    let received = api.received.lock().unwrap();
    let body = &received[0].1;
    assert_eq!(body["content"][0]["value"], "No Content Provided");
    assert!(body["content"][1]["value"]
        .as_str()
        .unwrap()
        .contains("<p>see attached</p>"));
    assert_eq!(
        body["attachments"],
        json!([{
            "content": "YSxiCjEsMgo=",
            "type": "text/csv",
            "filename": "report.csv",
            "disposition": "attachment"
        }])
    );
}
