//! Transaction materializer
//!
//! Drains high-confidence unprocessed candidates into the downstream ledger
//! service. Creation and state transition are tied together by the
//! conditional `mark_candidate_processed`: a candidate crosses into the
//! ledger at most once, and any failure parks it as failed with the error
//! detail rather than retrying forever.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ExtractionConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::ExtractedCandidate;

/// Sender domain to short bank tag, for ledger-side filtering
const BANK_TAGS: &[(&str, &str)] = &[
    ("sbi.co.in", "sbi"),
    ("hdfcbank.com", "hdfc"),
    ("icicibank.com", "icici"),
    ("axisbank.com", "axis"),
    ("kotak.com", "kotak"),
    ("paytm.com", "paytm"),
    ("phonepe.com", "phonepe"),
];

/// Payload accepted by the ledger service's transaction endpoint
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTransactionRequest {
    pub amount: f64,
    pub transaction_type: String,
    pub description: String,
    pub transaction_date: DateTime<Utc>,
    pub category_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_name: Option<String>,
    pub notes: String,
    pub source: String,
    pub tags: String,
    pub account_name: String,
    pub payment_method: String,
}

impl LedgerTransactionRequest {
    /// Map a candidate into the ledger's shape, carrying provenance in the
    /// notes and tags so extracted entries stay auditable downstream.
    pub fn from_candidate(candidate: &ExtractedCandidate) -> Self {
        Self {
            amount: candidate.amount,
            transaction_type: candidate.kind.ledger_kind().to_string(),
            description: build_description(candidate),
            transaction_date: candidate.transaction_at,
            category_name: candidate.category_suggestion.clone(),
            merchant_name: candidate.merchant_name.clone(),
            notes: build_notes(candidate),
            source: "api".to_string(),
            tags: build_tags(candidate),
            account_name: "Default Account".to_string(),
            payment_method: "EMAIL_EXTRACTED".to_string(),
        }
    }
}

fn build_description(candidate: &ExtractedCandidate) -> String {
    let mut description = match &candidate.merchant_name {
        Some(merchant) => format!("Payment to {}", merchant),
        None => candidate.description.clone(),
    };
    if let Some(txn_id) = &candidate.provider_txn_id {
        description.push_str(&format!(" (ID: {})", txn_id));
    }
    description
}

fn build_notes(candidate: &ExtractedCandidate) -> String {
    let mut notes = String::from("Automatically extracted from email\n");
    notes.push_str(&format!("Sender: {}\n", candidate.sender_email));
    notes.push_str(&format!("Subject: {}\n", candidate.email_subject));
    notes.push_str(&format!("Confidence: {:.2}%\n", candidate.confidence * 100.0));
    if let Some(last4) = &candidate.account_last4 {
        notes.push_str(&format!("Account: ****{}\n", last4));
    }
    if let Some(last4) = &candidate.card_last4 {
        notes.push_str(&format!("Card: ****{}\n", last4));
    }
    if let Some(reference) = &candidate.reference_number {
        notes.push_str(&format!("Reference: {}\n", reference));
    }
    notes
}

fn build_tags(candidate: &ExtractedCandidate) -> String {
    let mut tags = vec!["email-extracted".to_string(), candidate.kind.as_str().to_string()];

    if let Some(domain) = candidate.sender_email.rsplit('@').next() {
        // Sender may be a full From header like "Bank <alerts@bank.com>"
        let domain = domain.trim_end_matches('>').to_lowercase();
        if let Some((_, tag)) = BANK_TAGS.iter().find(|(d, _)| *d == domain) {
            tags.push(tag.to_string());
        }
    }
    tags.join(",")
}

/// Downstream ledger service seam
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Create a transaction, returning the ledger's id for it
    async fn create_transaction(&self, request: &LedgerTransactionRequest) -> Result<i64>;
}

/// HTTP ledger client posting to the transaction endpoint
pub struct HttpLedgerClient {
    http: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpLedgerClient {
    pub const URL_ENV: &'static str = "MAILSPEND_LEDGER_URL";
    pub const TOKEN_ENV: &'static str = "MAILSPEND_LEDGER_TOKEN";

    pub fn new(base_url: &str, bearer_token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token,
        })
    }

    /// Build from `MAILSPEND_LEDGER_URL` / `MAILSPEND_LEDGER_TOKEN`.
    /// Returns None when no ledger is configured.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var(Self::URL_ENV).ok()?;
        let token = std::env::var(Self::TOKEN_ENV).ok();
        Self::new(&url, token).ok()
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn create_transaction(&self, request: &LedgerTransactionRequest) -> Result<i64> {
        #[derive(Deserialize)]
        struct Created {
            id: i64,
        }

        let mut builder = self
            .http
            .post(format!("{}/api/transactions", self.base_url))
            .json(request);
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Ledger(format!(
                "transaction create failed: {} {}",
                status, body
            )));
        }

        let created: Created = response.json().await?;
        Ok(created.id)
    }
}

/// Drains high-confidence candidates into the ledger on a schedule
pub struct Materializer<L: LedgerClient> {
    db: Database,
    ledger: L,
    threshold: f64,
}

impl<L: LedgerClient> Materializer<L> {
    pub fn new(db: Database, ledger: L, config: &ExtractionConfig) -> Self {
        Self {
            db,
            ledger,
            threshold: config.auto_create_threshold,
        }
    }

    /// One pass: highest confidence first, each candidate processed or
    /// failed independently. Returns the number materialized.
    pub async fn run_once(&self) -> Result<usize> {
        let candidates = self.db.unprocessed_above(self.threshold)?;
        if candidates.is_empty() {
            return Ok(0);
        }
        info!(count = candidates.len(), "materializing high-confidence candidates");

        let mut created = 0;
        for candidate in candidates {
            match self.materialize_one(&candidate).await {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(candidate_id = candidate.id, error = %e, "materialization failed");
                    if let Err(mark_err) = self
                        .db
                        .mark_candidate_failed(candidate.id, &format!("Processing failed: {}", e))
                    {
                        warn!(candidate_id = candidate.id, error = %mark_err, "failed to mark candidate");
                    }
                }
            }
        }
        Ok(created)
    }

    async fn materialize_one(&self, candidate: &ExtractedCandidate) -> Result<bool> {
        let request = LedgerTransactionRequest::from_candidate(candidate);
        let transaction_id = self.ledger.create_transaction(&request).await?;

        // The conditional transition is the idempotency guard: if another
        // run already processed this candidate, nothing is overwritten.
        let transitioned =
            self.db
                .mark_candidate_processed(candidate.id, Utc::now(), transaction_id)?;
        if transitioned {
            info!(
                candidate_id = candidate.id,
                transaction_id, "created ledger transaction"
            );
        }
        Ok(transitioned)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::models::{CandidateState, MailProvider, NewCandidate, TransactionKind};
    use chrono::Duration;

    /// Records requests and assigns sequential ids
    struct MockLedgerClient {
        requests: Arc<Mutex<Vec<LedgerTransactionRequest>>>,
        next_id: AtomicI64,
        fail: bool,
    }

    impl MockLedgerClient {
        fn new() -> Self {
            Self {
                requests: Arc::new(Mutex::new(Vec::new())),
                next_id: AtomicI64::new(100),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl LedgerClient for MockLedgerClient {
        async fn create_transaction(&self, request: &LedgerTransactionRequest) -> Result<i64> {
            if self.fail {
                return Err(Error::Ledger("ledger unavailable".to_string()));
            }
            self.requests.lock().unwrap().push(request.clone());
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn seeded_candidate(db: &Database, message_id: &str, confidence: f64) -> i64 {
        let account_id = db
            .upsert_mail_account(
                1,
                MailProvider::Gmail,
                "user@example.com",
                "enc",
                "enc",
                Utc::now() + Duration::hours(1),
                Utc::now() - Duration::days(30),
            )
            .unwrap();

        db.insert_candidate(
            account_id,
            message_id,
            &NewCandidate {
                sender_email: "alerts@hdfcbank.com".to_string(),
                email_subject: "Debit alert".to_string(),
                raw_body: "Rs.500.00 debited".to_string(),
                amount: 500.0,
                currency: "INR".to_string(),
                kind: TransactionKind::Debit,
                merchant_name: Some("Amazon".to_string()),
                account_last4: Some("1234".to_string()),
                card_last4: None,
                provider_txn_id: Some("TXN42".to_string()),
                reference_number: Some("RRN7".to_string()),
                description: "Debit alert".to_string(),
                category_suggestion: "Shopping".to_string(),
                transaction_at: Utc::now(),
                confidence,
            },
        )
        .unwrap()
        .unwrap()
    }

    fn fetch(db: &Database, id: i64) -> ExtractedCandidate {
        db.get_candidate(id).unwrap().unwrap()
    }

    #[test]
    fn test_request_mapping() {
        let db = Database::in_memory().unwrap();
        let id = seeded_candidate(&db, "m1", 0.9);
        let request = LedgerTransactionRequest::from_candidate(&fetch(&db, id));

        assert_eq!(request.transaction_type, "EXPENSE");
        assert_eq!(request.description, "Payment to Amazon (ID: TXN42)");
        assert_eq!(request.tags, "email-extracted,debit,hdfc");
        assert_eq!(request.source, "api");
        assert_eq!(request.account_name, "Default Account");
        assert_eq!(request.payment_method, "EMAIL_EXTRACTED");
        assert!(request.notes.contains("Sender: alerts@hdfcbank.com"));
        assert!(request.notes.contains("Account: ****1234"));
        assert!(request.notes.contains("Reference: RRN7"));
        assert!(request.notes.contains("Confidence: 90.00%"));
        // Raw email body never leaves the extraction store
        assert!(!request.notes.contains("Rs.500.00 debited"));
    }

    #[test]
    fn test_tags_without_known_bank_domain() {
        let db = Database::in_memory().unwrap();
        let id = seeded_candidate(&db, "m1", 0.9);
        let mut candidate = fetch(&db, id);
        candidate.sender_email = "alerts@unknownbank.example".to_string();
        candidate.kind = TransactionKind::SalaryCredit;

        let request = LedgerTransactionRequest::from_candidate(&candidate);
        assert_eq!(request.tags, "email-extracted,salary_credit");
        assert_eq!(request.transaction_type, "INCOME");
    }

    #[tokio::test]
    async fn test_run_once_materializes_above_threshold() {
        let db = Database::in_memory().unwrap();
        let high = seeded_candidate(&db, "high", 0.95);
        let low = seeded_candidate(&db, "low", 0.5);

        let ledger = MockLedgerClient::new();
        let requests = ledger.requests.clone();
        let materializer = Materializer::new(db.clone(), ledger, &ExtractionConfig::default());

        assert_eq!(materializer.run_once().await.unwrap(), 1);
        assert_eq!(requests.lock().unwrap().len(), 1);

        let processed = fetch(&db, high);
        assert_eq!(processed.state, CandidateState::Processed);
        assert_eq!(processed.ledger_transaction_id, Some(100));

        // Below-threshold candidate stays unprocessed for review
        assert_eq!(fetch(&db, low).state, CandidateState::Unprocessed);
    }

    #[tokio::test]
    async fn test_run_once_is_idempotent() {
        let db = Database::in_memory().unwrap();
        let id = seeded_candidate(&db, "m1", 0.95);

        let ledger = MockLedgerClient::new();
        let requests = ledger.requests.clone();
        let materializer = Materializer::new(db.clone(), ledger, &ExtractionConfig::default());

        assert_eq!(materializer.run_once().await.unwrap(), 1);
        assert_eq!(materializer.run_once().await.unwrap(), 0);
        assert_eq!(requests.lock().unwrap().len(), 1);
        assert_eq!(fetch(&db, id).ledger_transaction_id, Some(100));
    }

    #[tokio::test]
    async fn test_ledger_failure_parks_candidate_as_failed() {
        let db = Database::in_memory().unwrap();
        let id = seeded_candidate(&db, "m1", 0.95);

        let materializer = Materializer::new(
            db.clone(),
            MockLedgerClient::failing(),
            &ExtractionConfig::default(),
        );

        assert_eq!(materializer.run_once().await.unwrap(), 0);
        let candidate = fetch(&db, id);
        assert_eq!(candidate.state, CandidateState::Failed);
        assert!(candidate.error_detail.as_deref().unwrap().contains("ledger unavailable"));

        // Failed candidates are not auto-retried on the next pass
        assert_eq!(materializer.run_once().await.unwrap(), 0);
    }
}
