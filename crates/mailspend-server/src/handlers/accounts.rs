//! Connected mail account handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use mailspend_core::{AccountStatus, MailAccount};

use crate::{get_user_id, AppError, AppState, SuccessResponse};

use super::{core_error, owned_account};

/// API view of a connected account; token material never leaves the server
#[derive(Serialize)]
pub struct AccountView {
    pub id: i64,
    pub provider: String,
    pub email_address: String,
    pub status: &'static str,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub total_emails_processed: i64,
    pub total_transactions_extracted: i64,
    pub created_at: DateTime<Utc>,
}

impl From<&MailAccount> for AccountView {
    fn from(account: &MailAccount) -> Self {
        Self {
            id: account.id,
            provider: account.provider.to_string(),
            email_address: account.email_address.clone(),
            status: status_label(account.status()),
            last_sync_at: account.last_sync_at,
            total_emails_processed: account.total_emails_processed,
            total_transactions_extracted: account.total_transactions_extracted,
            created_at: account.created_at,
        }
    }
}

fn status_label(status: AccountStatus) -> &'static str {
    match status {
        AccountStatus::Connected => "Connected",
        AccountStatus::NeedsRefresh => "Needs Refresh",
        AccountStatus::TokenExpired => "Token Expired",
        AccountStatus::Disconnected => "Disconnected",
    }
}

/// GET /api/accounts - List the caller's connected accounts
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<AccountView>>, AppError> {
    let user_id = get_user_id(&headers)?;

    let accounts = state.db.list_accounts_for_user(user_id)?;
    Ok(Json(accounts.iter().map(AccountView::from).collect()))
}

/// DELETE /api/accounts/:id - Disconnect an account
///
/// Tokens are cleared; extracted candidates are kept.
pub async fn disconnect_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<SuccessResponse>, AppError> {
    let user_id = get_user_id(&headers)?;

    let account = owned_account(&state, user_id, id)?;
    state.db.deactivate_account(account.id)?;

    Ok(Json(SuccessResponse { success: true }))
}

/// Counters from a manual sync pass
#[derive(Serialize)]
pub struct SyncResponse {
    pub emails_seen: i64,
    pub extracted: i64,
}

/// POST /api/accounts/:id/sync - Sync one account immediately
pub async fn sync_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<SyncResponse>, AppError> {
    let user_id = get_user_id(&headers)?;

    owned_account(&state, user_id, id)?;
    let outcome = state.sync.sync_account(id).await.map_err(core_error)?;

    Ok(Json(SyncResponse {
        emails_seen: outcome.emails_seen,
        extracted: outcome.extracted,
    }))
}

/// GET /api/accounts/:id/senders - Distinct senders seen for an account
pub async fn list_senders(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<Vec<String>>, AppError> {
    let user_id = get_user_id(&headers)?;

    let account = owned_account(&state, user_id, id)?;
    Ok(Json(state.db.distinct_senders(account.id)?))
}
