//! HTTP request handlers organized by domain
//!
//! Each submodule contains handlers for a specific API area.

pub mod accounts;
pub mod candidates;
pub mod oauth;

// Re-export all handlers for use in router
pub use accounts::*;
pub use candidates::*;
pub use oauth::*;

use std::sync::Arc;

use mailspend_core::{Error as CoreError, MailAccount};

use crate::{AppError, AppState};

/// Map a core error to an API error, sanitizing internal detail
pub(crate) fn core_error(err: CoreError) -> AppError {
    match err {
        CoreError::NotFound(msg) => AppError::not_found(&msg),
        CoreError::InvalidData(msg) => AppError::bad_request(&msg),
        CoreError::Unauthorized(_) | CoreError::Encryption(_) => {
            AppError::unauthorized("Provider authorization failed")
        }
        other => other.into(),
    }
}

/// Fetch an account and verify it belongs to the requesting user
///
/// Accounts of other users are indistinguishable from missing ones.
pub(crate) fn owned_account(
    state: &Arc<AppState>,
    user_id: i64,
    account_id: i64,
) -> Result<MailAccount, AppError> {
    state
        .db
        .get_mail_account(account_id)?
        .filter(|account| account.user_id == user_id)
        .ok_or_else(|| AppError::not_found(&format!("Account {} not found", account_id)))
}
