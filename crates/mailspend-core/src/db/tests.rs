use chrono::{Duration, Utc};

use super::Database;
use crate::models::{CandidateState, MailProvider, NewCandidate, TransactionKind};

fn test_candidate(confidence: f64) -> NewCandidate {
    NewCandidate {
        sender_email: "alerts@hdfcbank.com".to_string(),
        email_subject: "Debit alert".to_string(),
        raw_body: "Rs.500.00 debited from account XX1234".to_string(),
        amount: 500.0,
        currency: "INR".to_string(),
        kind: TransactionKind::Debit,
        merchant_name: Some("Amazon".to_string()),
        account_last4: Some("1234".to_string()),
        card_last4: None,
        provider_txn_id: Some("TXN123".to_string()),
        reference_number: None,
        description: "Debit alert".to_string(),
        category_suggestion: "Shopping".to_string(),
        transaction_at: Utc::now(),
        confidence,
    }
}

fn connect_account(db: &Database, user_id: i64, address: &str) -> i64 {
    db.upsert_mail_account(
        user_id,
        MailProvider::Gmail,
        address,
        "enc-access",
        "enc-refresh",
        Utc::now() + Duration::hours(1),
        Utc::now() - Duration::days(30),
    )
    .unwrap()
}

#[test]
fn test_upsert_reuses_existing_row() {
    let db = Database::in_memory().unwrap();
    let first = connect_account(&db, 1, "user@example.com");

    // Re-connecting the same mailbox must not create a second row
    let second = connect_account(&db, 1, "user@example.com");
    assert_eq!(first, second);
    assert_eq!(db.count_active_accounts_for_user(1).unwrap(), 1);

    // Same address under a different provider is a distinct account
    let other = db
        .upsert_mail_account(
            1,
            MailProvider::Outlook,
            "user@example.com",
            "enc-access",
            "enc-refresh",
            Utc::now() + Duration::hours(1),
            Utc::now() - Duration::days(30),
        )
        .unwrap();
    assert_ne!(first, other);
}

#[test]
fn test_upsert_reactivates_deactivated_account() {
    let db = Database::in_memory().unwrap();
    let id = connect_account(&db, 1, "user@example.com");

    db.deactivate_account(id).unwrap();
    let account = db.get_mail_account(id).unwrap().unwrap();
    assert!(!account.is_active);
    assert!(account.encrypted_access_token.is_none());
    assert!(account.encrypted_refresh_token.is_none());
    assert!(account.token_expires_at.is_none());

    let again = connect_account(&db, 1, "user@example.com");
    assert_eq!(id, again);
    let account = db.get_mail_account(id).unwrap().unwrap();
    assert!(account.is_active);
    assert!(account.encrypted_access_token.is_some());
}

#[test]
fn test_accounts_due_for_sync() {
    let db = Database::in_memory().unwrap();
    let never_synced = connect_account(&db, 1, "a@example.com");
    let stale = connect_account(&db, 1, "b@example.com");
    let fresh = connect_account(&db, 1, "c@example.com");
    let inactive = connect_account(&db, 1, "d@example.com");

    let now = Utc::now();
    db.update_sync_stats(stale, now - Duration::minutes(30), 10, 2)
        .unwrap();
    db.update_sync_stats(fresh, now - Duration::minutes(1), 5, 1)
        .unwrap();
    db.deactivate_account(inactive).unwrap();

    let due = db.accounts_due_for_sync(now - Duration::minutes(5)).unwrap();
    let ids: Vec<i64> = due.iter().map(|a| a.id).collect();
    assert!(ids.contains(&never_synced));
    assert!(ids.contains(&stale));
    assert!(!ids.contains(&fresh));
    assert!(!ids.contains(&inactive));
}

#[test]
fn test_accounts_with_expired_tokens() {
    let db = Database::in_memory().unwrap();
    let expired = db
        .upsert_mail_account(
            1,
            MailProvider::Gmail,
            "expired@example.com",
            "enc",
            "enc",
            Utc::now() - Duration::hours(1),
            Utc::now() - Duration::days(30),
        )
        .unwrap();
    let valid = connect_account(&db, 1, "valid@example.com");

    let rows = db.accounts_with_expired_tokens(Utc::now()).unwrap();
    let ids: Vec<i64> = rows.iter().map(|a| a.id).collect();
    assert!(ids.contains(&expired));
    assert!(!ids.contains(&valid));
}

#[test]
fn test_update_sync_stats_accumulates() {
    let db = Database::in_memory().unwrap();
    let id = connect_account(&db, 1, "user@example.com");

    db.update_sync_stats(id, Utc::now(), 100, 7).unwrap();
    db.update_sync_stats(id, Utc::now(), 50, 3).unwrap();

    let account = db.get_mail_account(id).unwrap().unwrap();
    assert_eq!(account.total_emails_processed, 150);
    assert_eq!(account.total_transactions_extracted, 10);
    assert!(account.last_sync_at.is_some());
}

#[test]
fn test_update_tokens_rotation() {
    let db = Database::in_memory().unwrap();
    let id = connect_account(&db, 1, "user@example.com");
    let expires = Utc::now() + Duration::hours(2);

    db.update_tokens(id, "new-access", "new-refresh", expires)
        .unwrap();
    let account = db.get_mail_account(id).unwrap().unwrap();
    assert_eq!(account.encrypted_access_token.as_deref(), Some("new-access"));
    assert_eq!(account.encrypted_refresh_token.as_deref(), Some("new-refresh"));

    db.update_access_token(id, "newer-access", expires).unwrap();
    let account = db.get_mail_account(id).unwrap().unwrap();
    assert_eq!(account.encrypted_access_token.as_deref(), Some("newer-access"));
    // Refresh token is untouched when only the access token rotates
    assert_eq!(account.encrypted_refresh_token.as_deref(), Some("new-refresh"));
}

#[test]
fn test_insert_candidate_dedups_on_message_id() {
    let db = Database::in_memory().unwrap();
    let account_id = connect_account(&db, 1, "user@example.com");

    let first = db
        .insert_candidate(account_id, "msg-1", &test_candidate(0.9))
        .unwrap();
    assert!(first.is_some());
    assert!(db.candidate_exists(account_id, "msg-1").unwrap());

    // Same message again is silently ignored
    let second = db
        .insert_candidate(account_id, "msg-1", &test_candidate(0.9))
        .unwrap();
    assert!(second.is_none());
    assert_eq!(db.count_candidates_for_account(account_id).unwrap(), 1);

    // Same message id under a different account is a distinct candidate
    let other_account = connect_account(&db, 2, "other@example.com");
    let third = db
        .insert_candidate(other_account, "msg-1", &test_candidate(0.9))
        .unwrap();
    assert!(third.is_some());
}

#[test]
fn test_mark_processed_is_single_shot() {
    let db = Database::in_memory().unwrap();
    let account_id = connect_account(&db, 1, "user@example.com");
    let id = db
        .insert_candidate(account_id, "msg-1", &test_candidate(0.9))
        .unwrap()
        .unwrap();

    assert!(db.mark_candidate_processed(id, Utc::now(), 42).unwrap());
    let candidate = db.get_candidate(id).unwrap().unwrap();
    assert_eq!(candidate.state, CandidateState::Processed);
    assert_eq!(candidate.ledger_transaction_id, Some(42));
    assert!(candidate.processed_at.is_some());

    // A second transition attempt must be a no-op
    assert!(!db.mark_candidate_processed(id, Utc::now(), 99).unwrap());
    let candidate = db.get_candidate(id).unwrap().unwrap();
    assert_eq!(candidate.ledger_transaction_id, Some(42));
}

#[test]
fn test_mark_failed_and_retry() {
    let db = Database::in_memory().unwrap();
    let account_id = connect_account(&db, 1, "user@example.com");
    let id = db
        .insert_candidate(account_id, "msg-1", &test_candidate(0.9))
        .unwrap()
        .unwrap();

    db.mark_candidate_failed(id, "ledger unavailable").unwrap();
    let candidate = db.get_candidate(id).unwrap().unwrap();
    assert_eq!(candidate.state, CandidateState::Failed);
    assert_eq!(candidate.error_detail.as_deref(), Some("ledger unavailable"));

    // Failed candidates are no longer picked up for materialization
    assert!(db.unprocessed_above(0.0).unwrap().is_empty());

    assert!(db.retry_candidate(id).unwrap());
    let candidate = db.get_candidate(id).unwrap().unwrap();
    assert_eq!(candidate.state, CandidateState::Unprocessed);
    assert!(candidate.error_detail.is_none());

    // Retrying a candidate that is not failed is a no-op
    assert!(!db.retry_candidate(id).unwrap());
}

#[test]
fn test_unprocessed_above_orders_by_confidence() {
    let db = Database::in_memory().unwrap();
    let account_id = connect_account(&db, 1, "user@example.com");

    db.insert_candidate(account_id, "low", &test_candidate(0.5))
        .unwrap();
    db.insert_candidate(account_id, "high", &test_candidate(0.95))
        .unwrap();
    db.insert_candidate(account_id, "mid", &test_candidate(0.85))
        .unwrap();

    let rows = db.unprocessed_above(0.8).unwrap();
    let ids: Vec<&str> = rows.iter().map(|c| c.message_id.as_str()).collect();
    assert_eq!(ids, vec!["high", "mid"]);

    // Threshold is inclusive
    let rows = db.unprocessed_above(0.5).unwrap();
    assert_eq!(rows.len(), 3);
}

#[test]
fn test_unprocessed_for_user_spans_accounts() {
    let db = Database::in_memory().unwrap();
    let a = connect_account(&db, 1, "a@example.com");
    let b = connect_account(&db, 1, "b@example.com");
    let other = connect_account(&db, 2, "c@example.com");

    db.insert_candidate(a, "m1", &test_candidate(0.9)).unwrap();
    db.insert_candidate(b, "m2", &test_candidate(0.9)).unwrap();
    db.insert_candidate(other, "m3", &test_candidate(0.9))
        .unwrap();

    let rows = db.unprocessed_for_user(1).unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|c| c.account_id == a || c.account_id == b));
}

#[test]
fn test_candidates_for_account_paging() {
    let db = Database::in_memory().unwrap();
    let account_id = connect_account(&db, 1, "user@example.com");

    for i in 0..5 {
        let mut candidate = test_candidate(0.9);
        candidate.transaction_at = Utc::now() - Duration::minutes(i);
        db.insert_candidate(account_id, &format!("msg-{}", i), &candidate)
            .unwrap();
    }

    let page = db.candidates_for_account(account_id, 2, 0).unwrap();
    assert_eq!(page.len(), 2);
    // Newest transaction first
    assert_eq!(page[0].message_id, "msg-0");

    let page = db.candidates_for_account(account_id, 2, 4).unwrap();
    assert_eq!(page.len(), 1);
}

#[test]
fn test_distinct_senders() {
    let db = Database::in_memory().unwrap();
    let account_id = connect_account(&db, 1, "user@example.com");

    let mut c = test_candidate(0.9);
    db.insert_candidate(account_id, "m1", &c).unwrap();
    db.insert_candidate(account_id, "m2", &c).unwrap();
    c.sender_email = "alerts@icicibank.com".to_string();
    db.insert_candidate(account_id, "m3", &c).unwrap();

    let senders = db.distinct_senders(account_id).unwrap();
    assert_eq!(
        senders,
        vec![
            "alerts@hdfcbank.com".to_string(),
            "alerts@icicibank.com".to_string()
        ]
    );
}

#[test]
fn test_stats_counters() {
    let db = Database::in_memory().unwrap();
    let account_id = connect_account(&db, 1, "user@example.com");

    let first = db
        .insert_candidate(account_id, "m1", &test_candidate(0.9))
        .unwrap()
        .unwrap();
    db.insert_candidate(account_id, "m2", &test_candidate(0.7))
        .unwrap();

    let since = Utc::now() - Duration::hours(1);
    assert_eq!(db.count_extracted_since(since).unwrap(), 2);
    let avg = db.average_confidence_since(since).unwrap().unwrap();
    assert!((avg - 0.8).abs() < 1e-9);

    assert_eq!(db.count_unprocessed_for_account(account_id).unwrap(), 2);
    db.mark_candidate_processed(first, Utc::now(), 1).unwrap();
    assert_eq!(db.count_unprocessed_for_account(account_id).unwrap(), 1);
}

#[test]
fn test_encrypted_database_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("enc.db");
    let path_str = path.to_str().unwrap();

    {
        let db = Database::new_with_key(path_str, Some("passphrase")).unwrap();
        connect_account(&db, 1, "user@example.com");
    }

    let db = Database::new_with_key(path_str, Some("passphrase")).unwrap();
    assert_eq!(db.count_active_accounts_for_user(1).unwrap(), 1);
}
