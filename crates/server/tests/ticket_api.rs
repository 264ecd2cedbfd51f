//! Ticket API tests driven through the in-process router.

mod common;

use axum::http::StatusCode;
use serde_json::{json, Value};

use common::{fixtures, TestFixture};
use ticketgate_core::{MessageKind, StateStore, TicketStatus};

fn create_body(customer_id: &str, channel: &str) -> Value {
    serde_json::to_value(fixtures::create_request(customer_id, channel)).unwrap()
}

fn follow_up_body(customer_id: &str) -> Value {
    json!({
        "source": "sberapi",
        "customer_internal_id": customer_id,
        "id_channel_operator": "ABCD12-x",
        "tt_number": "ERTH-1",
        "comment": "please hurry"
    })
}

#[tokio::test]
async fn test_health() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/health").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_config_is_sanitized() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/config").await;
    assert_status!(response, StatusCode::OK);

    let body = &response.body;
    assert_eq!(body["server"]["port"], 14801);
    assert_eq!(body["broker"]["password_configured"], true);
    assert!(body["broker"].get("password").is_none());
    assert_eq!(body["registry"]["inbound_schema_id"], 71);
    assert_eq!(body["sources"][0]["name"], "sberapi");

    let text = body.to_string();
    assert!(!text.contains("hunter2"));
    assert!(!text.contains("secret"));
}

#[tokio::test]
async fn test_create_ticket_accepted() {
    let fixture = TestFixture::new();
    let response = fixture
        .post("/api/v1/createticket", create_body("C100", "ABCD12-x"))
        .await;

    assert_status!(response, StatusCode::ACCEPTED);
    assert_eq!(response.body["customer_id"], "C100");
    assert_eq!(response.body["billing_channel"], "RIAS_12");
    assert_eq!(response.body["status"], "creating");

    let produced = fixture.channel.produced().await;
    assert_eq!(produced.len(), 1);
    assert_eq!(produced[0].kind, MessageKind::Create);
    assert_eq!(
        fixture.store.get_status("C100").await.unwrap(),
        Some(TicketStatus::Creating)
    );
}

#[tokio::test]
async fn test_create_ticket_missing_fields() {
    let fixture = TestFixture::new();
    let response = fixture
        .post(
            "/api/v1/createticket",
            json!({ "customer_internal_id": "C100", "id_channel_operator": "ABCD12-x" }),
        )
        .await;

    assert_status!(response, StatusCode::BAD_REQUEST);
    let error = response.body["error"].as_str().unwrap();
    assert!(error.contains("description"));
    assert_eq!(fixture.channel.produced_count().await, 0);
}

#[tokio::test]
async fn test_create_ticket_unroutable_channel() {
    let fixture = TestFixture::new();
    let response = fixture
        .post("/api/v1/createticket", create_body("C100", "AB1-x"))
        .await;

    assert_status!(response, StatusCode::BAD_REQUEST);
    assert!(fixture.store.get("C100").await.unwrap().is_none());
}

#[tokio::test]
async fn test_malformed_json_is_rejected() {
    let fixture = TestFixture::new();
    let response = fixture.post_raw("/api/v1/createticket", "{not json").await;
    assert!(response.status.is_client_error());
    assert_eq!(fixture.channel.produced_count().await, 0);
}

#[tokio::test]
async fn test_follow_up_for_unknown_customer() {
    let fixture = TestFixture::new();
    let response = fixture
        .post("/api/v1/closeticket", follow_up_body("C404"))
        .await;

    assert_status!(response, StatusCode::NOT_FOUND);
    assert_eq!(fixture.channel.produced_count().await, 0);
}

#[tokio::test]
async fn test_follow_up_operations() {
    let fixture = TestFixture::new();
    fixture
        .post("/api/v1/createticket", create_body("C100", "ABCD12-x"))
        .await;

    let cases = [
        ("/api/v1/changeticketstatus", MessageKind::Wait, "waiting"),
        ("/api/v1/reopenticket", MessageKind::Reopen, "working"),
        ("/api/v1/addnotetoticket", MessageKind::Note, "working"),
        ("/api/v1/checkticketstatus", MessageKind::Status, "working"),
        ("/api/v1/closeticket", MessageKind::Close, "closed"),
    ];

    for (path, kind, status) in cases {
        let response = fixture.post(path, follow_up_body("C100")).await;
        assert_status!(response, StatusCode::ACCEPTED);
        assert_eq!(response.body["status"], status, "{path}");
        assert_eq!(response.body["billing_channel"], "RIAS_12");

        let produced = fixture.channel.produced().await;
        let last = produced.last().unwrap();
        assert_eq!(last.kind, kind, "{path}");
        assert_eq!(last.billing_channel, "RIAS_12");
    }
    assert_eq!(fixture.channel.produced_count().await, 6);
}

#[tokio::test]
async fn test_follow_up_requires_ticket_number() {
    let fixture = TestFixture::new();
    fixture
        .post("/api/v1/createticket", create_body("C100", "ABCD12-x"))
        .await;

    let mut body = follow_up_body("C100");
    body["tt_number"] = json!("");
    let response = fixture.post("/api/v1/closeticket", body).await;

    assert_status!(response, StatusCode::BAD_REQUEST);
    assert_eq!(
        fixture.store.get_status("C100").await.unwrap(),
        Some(TicketStatus::Creating)
    );
}

#[tokio::test]
async fn test_broker_failure_is_server_error() {
    let fixture = TestFixture::new();
    fixture.channel.set_failing(true).await;

    let response = fixture
        .post("/api/v1/createticket", create_body("C100", "ABCD12-x"))
        .await;
    assert_status!(response, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_cached_status() {
    let fixture = TestFixture::new();
    fixture
        .post("/api/v1/createticket", create_body("C100", "ABCD12-x"))
        .await;

    let response = fixture
        .post("/api/v1/cache/checkticketstatus", follow_up_body("C100"))
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["customer_internal_id"], "C100");
    assert_eq!(response.body["status"], "creating");
    assert_eq!(response.body["comment"], "please hurry");

    // Cached reads never reach the backend.
    assert_eq!(fixture.channel.produced_count().await, 1);

    let missing = fixture
        .post("/api/v1/cache/checkticketstatus", follow_up_body("C404"))
        .await;
    assert_status!(missing, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new();
    fixture.get("/api/v1/health").await;

    let (status, text) = fixture.get_text("/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("ticketgate_http_requests_total"));
}
