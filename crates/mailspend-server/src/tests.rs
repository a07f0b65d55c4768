//! Server API tests

use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use std::collections::HashMap;
use tower::ServiceExt;

use mailspend_core::{
    CandidateState, MailProvider, MockProviderClient, ProviderClient, RawEmail, SyncOrchestrator,
    TokenCipher,
};

const TEST_PASSPHRASE: &str = "test-passphrase";

fn test_state(client: MockProviderClient) -> Arc<AppState> {
    let db = Database::in_memory().unwrap();
    let cipher = TokenCipher::from_passphrase(TEST_PASSPHRASE).unwrap();

    let mut clients: HashMap<MailProvider, Arc<dyn ProviderClient>> = HashMap::new();
    clients.insert(MailProvider::Gmail, Arc::new(client));

    let sync = SyncOrchestrator::with_clients(
        db.clone(),
        cipher,
        ExtractionConfig::default(),
        clients,
    )
    .unwrap();

    Arc::new(AppState::new(db, sync))
}

/// Store a connected account directly, bypassing the OAuth flow
fn connect_account(state: &Arc<AppState>, user_id: i64, address: &str) -> i64 {
    let cipher = TokenCipher::from_passphrase(TEST_PASSPHRASE).unwrap();
    state
        .db
        .upsert_mail_account(
            user_id,
            MailProvider::Gmail,
            address,
            &cipher.encrypt("mock-access").unwrap(),
            &cipher.encrypt("mock-refresh").unwrap(),
            Utc::now() + Duration::hours(1),
            Utc::now() - Duration::days(30),
        )
        .unwrap()
}

fn financial_email(id: &str) -> RawEmail {
    RawEmail {
        message_id: id.to_string(),
        subject: "Debit alert".to_string(),
        sender: "alerts@hdfcbank.com".to_string(),
        body: "Rs.2,500.00 debited from account XX1234 at AMAZON on 01-07-2025. \
               Transaction ID: TXN9988"
            .to_string(),
        received_at: Utc::now(),
    }
}

fn request(method: &str, uri: &str, user: Option<i64>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(id) = user {
        builder = builder.header("x-user-id", id.to_string());
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(state: &Arc<AppState>, req: Request<Body>) -> axum::response::Response {
    create_router(state.clone()).oneshot(req).await.unwrap()
}

async fn get_body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body();
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ========== Health ==========

#[tokio::test]
async fn test_health() {
    let state = test_state(MockProviderClient::new());

    let response = send(&state, request("GET", "/health", None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json["status"], "ok");
}

// ========== Accounts ==========

#[tokio::test]
async fn test_accounts_require_user_header() {
    let state = test_state(MockProviderClient::new());

    let response = send(&state, request("GET", "/api/accounts", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_list_accounts_hides_token_material() {
    let state = test_state(MockProviderClient::new());
    connect_account(&state, 1, "user@example.com");

    let response = send(&state, request("GET", "/api/accounts", Some(1))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    let accounts = json.as_array().unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0]["email_address"], "user@example.com");
    assert_eq!(accounts[0]["status"], "Connected");
    assert!(accounts[0].get("encrypted_access_token").is_none());
    assert!(accounts[0].get("encrypted_refresh_token").is_none());

    // Other users see nothing
    let response = send(&state, request("GET", "/api/accounts", Some(2))).await;
    let json = get_body_json(response).await;
    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_disconnect_account() {
    let state = test_state(MockProviderClient::new());
    let account_id = connect_account(&state, 1, "user@example.com");

    let response = send(
        &state,
        request("DELETE", &format!("/api/accounts/{}", account_id), Some(1)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&state, request("GET", "/api/accounts", Some(1))).await;
    let json = get_body_json(response).await;
    assert_eq!(json[0]["status"], "Disconnected");
}

#[tokio::test]
async fn test_disconnect_rejects_foreign_account() {
    let state = test_state(MockProviderClient::new());
    let account_id = connect_account(&state, 1, "user@example.com");

    let response = send(
        &state,
        request("DELETE", &format!("/api/accounts/{}", account_id), Some(2)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Untouched
    let account = state.db.get_mail_account(account_id).unwrap().unwrap();
    assert!(account.is_active);
}

// ========== OAuth ==========

#[tokio::test]
async fn test_oauth_connect_and_callback() {
    let state = test_state(MockProviderClient::new().with_user_email("inbox@example.com"));

    let response = send(&state, request("GET", "/api/auth/gmail/connect", Some(7))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    let nonce = json["state"].as_str().unwrap().to_string();
    assert!(json["authorization_url"]
        .as_str()
        .unwrap()
        .contains(&nonce));

    let uri = format!("/api/auth/gmail/callback?code=auth-code&state={}", nonce);
    let response = send(&state, request("GET", &uri, None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json["email_address"], "inbox@example.com");
    assert_eq!(json["status"], "Connected");

    let accounts = state.db.list_accounts_for_user(7).unwrap();
    assert_eq!(accounts.len(), 1);

    // The state was consumed: replaying the callback fails
    let response = send(&state, request("GET", &uri, None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_oauth_callback_rejects_unknown_state() {
    let state = test_state(MockProviderClient::new());

    let response = send(
        &state,
        request(
            "GET",
            "/api/auth/gmail/callback?code=auth-code&state=forged",
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_oauth_connect_unknown_provider() {
    let state = test_state(MockProviderClient::new());

    let response = send(&state, request("GET", "/api/auth/aol/connect", Some(1))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oauth_connect_unconfigured_provider() {
    // Only gmail has a client in the test state
    let state = test_state(MockProviderClient::new());

    let response = send(&state, request("GET", "/api/auth/outlook/connect", Some(1))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ========== Sync and candidates ==========

#[tokio::test]
async fn test_manual_sync_extracts_candidates() {
    let state = test_state(
        MockProviderClient::new().with_emails(vec![financial_email("m1")]),
    );
    let account_id = connect_account(&state, 1, "user@example.com");

    let response = send(
        &state,
        request(
            "POST",
            &format!("/api/accounts/{}/sync", account_id),
            Some(1),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json["emails_seen"], 1);
    assert_eq!(json["extracted"], 1);

    let response = send(
        &state,
        request(
            "GET",
            &format!("/api/candidates?account_id={}", account_id),
            Some(1),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json["total"], 1);
    let candidates = json["candidates"].as_array().unwrap();
    assert_eq!(candidates[0]["sender_email"], "alerts@hdfcbank.com");
    assert_eq!(candidates[0]["state"], "unprocessed");
}

#[tokio::test]
async fn test_sync_rejects_foreign_account() {
    let state = test_state(MockProviderClient::new());
    let account_id = connect_account(&state, 1, "user@example.com");

    let response = send(
        &state,
        request(
            "POST",
            &format!("/api/accounts/{}/sync", account_id),
            Some(2),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unprocessed_and_reject() {
    let state = test_state(
        MockProviderClient::new().with_emails(vec![financial_email("m1")]),
    );
    let account_id = connect_account(&state, 1, "user@example.com");

    send(
        &state,
        request(
            "POST",
            &format!("/api/accounts/{}/sync", account_id),
            Some(1),
        ),
    )
    .await;

    let response = send(&state, request("GET", "/api/candidates/unprocessed", Some(1))).await;
    let json = get_body_json(response).await;
    let unprocessed = json.as_array().unwrap();
    assert_eq!(unprocessed.len(), 1);
    let candidate_id = unprocessed[0]["id"].as_i64().unwrap();

    let response = send(
        &state,
        request(
            "POST",
            &format!("/api/candidates/{}/reject", candidate_id),
            Some(1),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&state, request("GET", "/api/candidates/unprocessed", Some(1))).await;
    let json = get_body_json(response).await;
    assert!(json.as_array().unwrap().is_empty());

    let candidate = state.db.get_candidate(candidate_id).unwrap().unwrap();
    assert_eq!(
        candidate.error_detail.as_deref(),
        Some("Rejected by user")
    );
}

#[tokio::test]
async fn test_retry_returns_failed_candidate_to_pool() {
    let state = test_state(
        MockProviderClient::new().with_emails(vec![financial_email("m1")]),
    );
    let account_id = connect_account(&state, 1, "user@example.com");

    send(
        &state,
        request(
            "POST",
            &format!("/api/accounts/{}/sync", account_id),
            Some(1),
        ),
    )
    .await;

    let candidate_id = state.db.unprocessed_for_user(1).unwrap()[0].id;

    // An unprocessed candidate has nothing to retry
    let retry_uri = format!("/api/candidates/{}/retry", candidate_id);
    let response = send(&state, request("POST", &retry_uri, Some(1))).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    state
        .db
        .mark_candidate_failed(candidate_id, "ledger unavailable")
        .unwrap();

    // Another user's retry is a 404, the owner's succeeds
    let response = send(&state, request("POST", &retry_uri, Some(2))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&state, request("POST", &retry_uri, Some(1))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let candidate = state.db.get_candidate(candidate_id).unwrap().unwrap();
    assert_eq!(candidate.state, CandidateState::Unprocessed);
    assert!(candidate.error_detail.is_none());
}

#[tokio::test]
async fn test_reject_rejects_foreign_candidate() {
    let state = test_state(
        MockProviderClient::new().with_emails(vec![financial_email("m1")]),
    );
    let account_id = connect_account(&state, 1, "user@example.com");

    send(
        &state,
        request(
            "POST",
            &format!("/api/accounts/{}/sync", account_id),
            Some(1),
        ),
    )
    .await;

    let candidates = state.db.unprocessed_for_user(1).unwrap();
    let candidate_id = candidates[0].id;

    let response = send(
        &state,
        request(
            "POST",
            &format!("/api/candidates/{}/reject", candidate_id),
            Some(2),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stats() {
    let state = test_state(
        MockProviderClient::new().with_emails(vec![financial_email("m1")]),
    );
    let account_id = connect_account(&state, 1, "user@example.com");

    send(
        &state,
        request(
            "POST",
            &format!("/api/accounts/{}/sync", account_id),
            Some(1),
        ),
    )
    .await;

    let response = send(&state, request("GET", "/api/stats", Some(1))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json["active_accounts"], 1);
    assert_eq!(json["unprocessed_candidates"], 1);
    assert_eq!(json["extracted_last_30_days"], 1);
    assert!(json["average_confidence_last_30_days"].as_f64().unwrap() > 0.0);
}

// ========== Senders ==========

#[tokio::test]
async fn test_list_senders() {
    let state = test_state(
        MockProviderClient::new().with_emails(vec![financial_email("m1")]),
    );
    let account_id = connect_account(&state, 1, "user@example.com");

    send(
        &state,
        request(
            "POST",
            &format!("/api/accounts/{}/sync", account_id),
            Some(1),
        ),
    )
    .await;

    let response = send(
        &state,
        request(
            "GET",
            &format!("/api/accounts/{}/senders", account_id),
            Some(1),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0], "alerts@hdfcbank.com");
}
