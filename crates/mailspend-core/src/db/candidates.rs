//! Extracted transaction candidate store
//!
//! Candidates are insert-only; after creation only the processing-state
//! transition operations below may mutate a row. The (account_id,
//! message_id) unique index is the dedup guarantee, and state transitions
//! use conditional updates so concurrent materializer runs cannot process a
//! candidate twice.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::{format_datetime, parse_datetime, Database};
use crate::error::Result;
use crate::models::{CandidateState, ExtractedCandidate, NewCandidate, TransactionKind};

fn candidate_from_row(row: &Row<'_>) -> rusqlite::Result<ExtractedCandidate> {
    let kind_str: String = row.get(7)?;
    let state_str: String = row.get(17)?;
    let transaction_at: String = row.get(15)?;
    let processed_at: Option<String> = row.get(18)?;
    let extracted_at: String = row.get(21)?;

    Ok(ExtractedCandidate {
        id: row.get(0)?,
        account_id: row.get(1)?,
        message_id: row.get(2)?,
        sender_email: row.get(3)?,
        email_subject: row.get(4)?,
        amount: row.get(5)?,
        currency: row.get(6)?,
        kind: kind_str.parse().unwrap_or(TransactionKind::Debit),
        merchant_name: row.get(8)?,
        account_last4: row.get(9)?,
        card_last4: row.get(10)?,
        provider_txn_id: row.get(11)?,
        reference_number: row.get(12)?,
        description: row.get(13)?,
        category_suggestion: row.get(14)?,
        transaction_at: parse_datetime(&transaction_at),
        confidence: row.get(16)?,
        state: state_str.parse().unwrap_or(CandidateState::Unprocessed),
        processed_at: processed_at.map(|s| parse_datetime(&s)),
        ledger_transaction_id: row.get(19)?,
        error_detail: row.get(20)?,
        extracted_at: parse_datetime(&extracted_at),
    })
}

const CANDIDATE_COLUMNS: &str = "id, account_id, message_id, sender_email, email_subject, \
     amount, currency, kind, merchant_name, account_last4, card_last4, provider_txn_id, \
     reference_number, description, category_suggestion, transaction_at, confidence, state, \
     processed_at, ledger_transaction_id, error_detail, extracted_at";

impl Database {
    /// Dedup check for (account, message id). Called before fetching and
    /// parsing a message so re-syncs skip already-extracted mail cheaply.
    pub fn candidate_exists(&self, account_id: i64, message_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM extracted_candidates WHERE account_id = ? AND message_id = ?",
            params![account_id, message_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert a candidate; returns the new row id, or None when the dedup
    /// key already exists (INSERT OR IGNORE on the unique index, so this is
    /// safe under concurrent runs over the same mailbox).
    pub fn insert_candidate(
        &self,
        account_id: i64,
        message_id: &str,
        candidate: &NewCandidate,
    ) -> Result<Option<i64>> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO extracted_candidates (account_id, message_id, sender_email, \
             email_subject, raw_body, amount, currency, kind, merchant_name, account_last4, \
             card_last4, provider_txn_id, reference_number, description, category_suggestion, \
             transaction_at, confidence) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                account_id,
                message_id,
                candidate.sender_email,
                candidate.email_subject,
                candidate.raw_body,
                candidate.amount,
                candidate.currency,
                candidate.kind.as_str(),
                candidate.merchant_name,
                candidate.account_last4,
                candidate.card_last4,
                candidate.provider_txn_id,
                candidate.reference_number,
                candidate.description,
                candidate.category_suggestion,
                format_datetime(candidate.transaction_at),
                candidate.confidence,
            ],
        )?;

        if inserted == 0 {
            return Ok(None);
        }
        Ok(Some(conn.last_insert_rowid()))
    }

    /// Transition unprocessed -> processed with the resulting ledger id
    ///
    /// Conditional on the current state, so a second call (or a concurrent
    /// run) is a no-op: returns true only when this call made the
    /// transition.
    pub fn mark_candidate_processed(
        &self,
        candidate_id: i64,
        processed_at: DateTime<Utc>,
        ledger_transaction_id: i64,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE extracted_candidates SET state = 'processed', processed_at = ?, \
             ledger_transaction_id = ?, error_detail = NULL \
             WHERE id = ? AND state = 'unprocessed'",
            params![format_datetime(processed_at), ledger_transaction_id, candidate_id],
        )?;
        Ok(changed > 0)
    }

    /// Transition to failed with error detail, clearing any processed
    /// linkage. Used for materialization failures and manual rejection.
    pub fn mark_candidate_failed(&self, candidate_id: i64, error_detail: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE extracted_candidates SET state = 'failed', processed_at = NULL, \
             ledger_transaction_id = NULL, error_detail = ? WHERE id = ?",
            params![error_detail, candidate_id],
        )?;
        Ok(())
    }

    /// Return a failed candidate to the unprocessed pool (operator retry)
    pub fn retry_candidate(&self, candidate_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE extracted_candidates SET state = 'unprocessed', error_detail = NULL \
             WHERE id = ? AND state = 'failed'",
            params![candidate_id],
        )?;
        Ok(changed > 0)
    }

    /// Get a candidate by ID
    pub fn get_candidate(&self, id: i64) -> Result<Option<ExtractedCandidate>> {
        use rusqlite::OptionalExtension;

        let conn = self.conn()?;
        let candidate = conn
            .query_row(
                &format!("SELECT {} FROM extracted_candidates WHERE id = ?", CANDIDATE_COLUMNS),
                params![id],
                candidate_from_row,
            )
            .optional()?;
        Ok(candidate)
    }

    /// Unprocessed candidates at or above the confidence threshold, highest
    /// confidence first; ties drain oldest first.
    pub fn unprocessed_above(&self, min_confidence: f64) -> Result<Vec<ExtractedCandidate>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM extracted_candidates WHERE state = 'unprocessed' \
             AND confidence >= ? ORDER BY confidence DESC, extracted_at ASC",
            CANDIDATE_COLUMNS
        ))?;

        let candidates = stmt
            .query_map(params![min_confidence], candidate_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(candidates)
    }

    /// All unprocessed candidates across a user's accounts
    pub fn unprocessed_for_user(&self, user_id: i64) -> Result<Vec<ExtractedCandidate>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM extracted_candidates WHERE state = 'unprocessed' AND account_id IN \
             (SELECT id FROM mail_accounts WHERE user_id = ?) ORDER BY transaction_at DESC",
            CANDIDATE_COLUMNS
        ))?;

        let candidates = stmt
            .query_map(params![user_id], candidate_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(candidates)
    }

    /// Paged candidates for one account, newest transactions first
    pub fn candidates_for_account(
        &self,
        account_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ExtractedCandidate>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM extracted_candidates WHERE account_id = ? \
             ORDER BY transaction_at DESC LIMIT ? OFFSET ?",
            CANDIDATE_COLUMNS
        ))?;

        let candidates = stmt
            .query_map(params![account_id, limit, offset], candidate_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(candidates)
    }

    /// Distinct sender addresses seen for an account
    pub fn distinct_senders(&self, account_id: i64) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT sender_email FROM extracted_candidates WHERE account_id = ? \
             ORDER BY sender_email",
        )?;

        let senders = stmt
            .query_map(params![account_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(senders)
    }

    /// Total candidates extracted for an account
    pub fn count_candidates_for_account(&self, account_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM extracted_candidates WHERE account_id = ?",
            params![account_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Unprocessed candidates for an account
    pub fn count_unprocessed_for_account(&self, account_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM extracted_candidates WHERE account_id = ? AND state = 'unprocessed'",
            params![account_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Candidates extracted since a timestamp (service-level stats)
    pub fn count_extracted_since(&self, since: DateTime<Utc>) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM extracted_candidates WHERE extracted_at >= ?",
            params![format_datetime(since)],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Average confidence of candidates extracted since a timestamp
    pub fn average_confidence_since(&self, since: DateTime<Utc>) -> Result<Option<f64>> {
        let conn = self.conn()?;
        let avg: Option<f64> = conn.query_row(
            "SELECT AVG(confidence) FROM extracted_candidates WHERE extracted_at >= ?",
            params![format_datetime(since)],
            |row| row.get(0),
        )?;
        Ok(avg)
    }
}
