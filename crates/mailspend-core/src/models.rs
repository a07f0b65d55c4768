//! Domain models for Mailspend

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Supported mail providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailProvider {
    Gmail,
    Outlook,
    Yahoo,
}

impl MailProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
            Self::Outlook => "outlook",
            Self::Yahoo => "yahoo",
        }
    }
}

impl std::str::FromStr for MailProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gmail" | "google" => Ok(Self::Gmail),
            "outlook" | "microsoft" => Ok(Self::Outlook),
            "yahoo" => Ok(Self::Yahoo),
            _ => Err(format!("Unknown mail provider: {}", s)),
        }
    }
}

impl std::fmt::Display for MailProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// User-visible connection status derived from token state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Connected,
    NeedsRefresh,
    TokenExpired,
    Disconnected,
}

/// A connected mail account
///
/// Tokens are stored encrypted (AES-256-GCM via `TokenCipher`) and cleared
/// when the account is deactivated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailAccount {
    pub id: i64,
    pub user_id: i64,
    pub provider: MailProvider,
    pub email_address: String,
    #[serde(skip_serializing)]
    pub encrypted_access_token: Option<String>,
    #[serde(skip_serializing)]
    pub encrypted_refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Lower bound for "new" mail when building provider queries
    pub sync_from_date: Option<DateTime<Utc>>,
    pub total_emails_processed: i64,
    pub total_transactions_extracted: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MailAccount {
    /// True when the token is missing an expiry, already expired, or expires
    /// within `skew` of now. Used to refresh proactively before use.
    pub fn needs_refresh(&self, skew: Duration) -> bool {
        match self.token_expires_at {
            None => true,
            Some(expires_at) => expires_at < Utc::now() + skew,
        }
    }

    /// True when the token expiry is strictly in the past
    pub fn token_expired(&self) -> bool {
        matches!(self.token_expires_at, Some(expires_at) if expires_at < Utc::now())
    }

    pub fn status(&self) -> AccountStatus {
        if !self.is_active {
            AccountStatus::Disconnected
        } else if self.token_expired() {
            AccountStatus::TokenExpired
        } else if self.needs_refresh(Duration::minutes(5)) {
            AccountStatus::NeedsRefresh
        } else {
            AccountStatus::Connected
        }
    }
}

/// Classified transaction kind from email text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Debit,
    Credit,
    Transfer,
    AtmWithdrawal,
    OnlinePurchase,
    MobilePayment,
    BillPayment,
    EmiPayment,
    InterestCredit,
    SalaryCredit,
    Refund,
    Charges,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
            Self::Transfer => "transfer",
            Self::AtmWithdrawal => "atm_withdrawal",
            Self::OnlinePurchase => "online_purchase",
            Self::MobilePayment => "mobile_payment",
            Self::BillPayment => "bill_payment",
            Self::EmiPayment => "emi_payment",
            Self::InterestCredit => "interest_credit",
            Self::SalaryCredit => "salary_credit",
            Self::Refund => "refund",
            Self::Charges => "charges",
        }
    }

    /// Ledger-side type: credit-like kinds become income, everything else
    /// (including transfers) becomes an expense.
    pub fn ledger_kind(&self) -> &'static str {
        match self {
            Self::Credit | Self::SalaryCredit | Self::InterestCredit | Self::Refund => "INCOME",
            _ => "EXPENSE",
        }
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debit" => Ok(Self::Debit),
            "credit" => Ok(Self::Credit),
            "transfer" => Ok(Self::Transfer),
            "atm_withdrawal" => Ok(Self::AtmWithdrawal),
            "online_purchase" => Ok(Self::OnlinePurchase),
            "mobile_payment" => Ok(Self::MobilePayment),
            "bill_payment" => Ok(Self::BillPayment),
            "emi_payment" => Ok(Self::EmiPayment),
            "interest_credit" => Ok(Self::InterestCredit),
            "salary_credit" => Ok(Self::SalaryCredit),
            "refund" => Ok(Self::Refund),
            "charges" => Ok(Self::Charges),
            _ => Err(format!("Unknown transaction kind: {}", s)),
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Processing state of an extracted candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateState {
    Unprocessed,
    Processed,
    Failed,
}

impl CandidateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unprocessed => "unprocessed",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for CandidateState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unprocessed" => Ok(Self::Unprocessed),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown candidate state: {}", s)),
        }
    }
}

/// A raw email as returned by a provider client
#[derive(Debug, Clone)]
pub struct RawEmail {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

/// Parser output before persistence. The dedup key (account, message id) is
/// attached by the orchestrator when storing.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCandidate {
    pub sender_email: String,
    pub email_subject: String,
    pub raw_body: String,
    pub amount: f64,
    pub currency: String,
    pub kind: TransactionKind,
    pub merchant_name: Option<String>,
    pub account_last4: Option<String>,
    pub card_last4: Option<String>,
    pub provider_txn_id: Option<String>,
    pub reference_number: Option<String>,
    pub description: String,
    pub category_suggestion: String,
    pub transaction_at: DateTime<Utc>,
    /// Heuristic extraction confidence in [0, 1]
    pub confidence: f64,
}

/// A persisted extracted transaction candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedCandidate {
    pub id: i64,
    pub account_id: i64,
    pub message_id: String,
    pub sender_email: String,
    pub email_subject: String,
    pub amount: f64,
    pub currency: String,
    pub kind: TransactionKind,
    pub merchant_name: Option<String>,
    pub account_last4: Option<String>,
    pub card_last4: Option<String>,
    pub provider_txn_id: Option<String>,
    pub reference_number: Option<String>,
    pub description: String,
    pub category_suggestion: String,
    pub transaction_at: DateTime<Utc>,
    pub confidence: f64,
    pub state: CandidateState,
    pub processed_at: Option<DateTime<Utc>>,
    pub ledger_transaction_id: Option<i64>,
    pub error_detail: Option<String>,
    pub extracted_at: DateTime<Utc>,
}

/// Per-account counters from a single orchestrator pass. Folded into the
/// account's cumulative totals by `update_sync_stats`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOutcome {
    pub emails_seen: i64,
    pub extracted: i64,
}
