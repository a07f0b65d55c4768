//! Mailspend Core Library
//!
//! Shared functionality for the Mailspend email transaction extraction
//! service:
//! - Database access and migrations (encrypted SQLite)
//! - OAuth token lifecycle with encrypted token storage
//! - Mail provider clients (Gmail, Outlook, Yahoo)
//! - Heuristic email transaction parser with confidence scoring
//! - Sync orchestration over a bounded worker pool
//! - Materialization of high-confidence candidates into the ledger service

pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod materialize;
pub mod models;
pub mod oauth_state;
pub mod parser;
pub mod provider;
pub mod sync;
pub mod token;

pub use config::{ExtractionConfig, OAuthConfig};
pub use crypto::TokenCipher;
pub use db::Database;
pub use error::{Error, Result};
pub use materialize::{HttpLedgerClient, LedgerClient, LedgerTransactionRequest, Materializer};
pub use models::{
    AccountStatus, CandidateState, ExtractedCandidate, MailAccount, MailProvider, NewCandidate,
    RawEmail, SyncOutcome, TransactionKind,
};
pub use oauth_state::StateStore;
pub use parser::EmailParser;
pub use provider::{
    client_for, GmailClient, MockProviderClient, OutlookClient, ProviderClient, TokenGrant,
    YahooClient,
};
pub use sync::SyncOrchestrator;
pub use token::TokenManager;
