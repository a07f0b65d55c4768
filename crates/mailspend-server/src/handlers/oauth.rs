//! OAuth connect and callback handlers
//!
//! `connect` hands the caller a provider consent URL carrying a single-use
//! anti-forgery state; `callback` redeems the state, exchanges the
//! authorization code, and stores the connected account with encrypted
//! tokens.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use mailspend_core::{crypto::random_state, MailProvider, ProviderClient};

use crate::{get_user_id, AppError, AppState};

use super::{core_error, AccountView};

/// Length of the anti-forgery state nonce
const STATE_LENGTH: usize = 32;

#[derive(Serialize)]
pub struct ConnectResponse {
    pub authorization_url: String,
    pub state: String,
}

/// GET /api/auth/:provider/connect - Begin an OAuth flow
pub async fn start_auth(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ConnectResponse>, AppError> {
    let user_id = get_user_id(&headers)?;
    let provider: MailProvider = provider
        .parse()
        .map_err(|e: String| AppError::bad_request(&e))?;

    let client = configured_client(&state, provider)?;

    let nonce = random_state(STATE_LENGTH);
    state.auth_states.insert(&nonce, user_id);

    Ok(Json(ConnectResponse {
        authorization_url: client.authorization_url(&nonce),
        state: nonce,
    }))
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub code: String,
    pub state: String,
}

/// GET /api/auth/:provider/callback - Complete an OAuth flow
///
/// The state is single use: replaying a callback yields 401.
pub async fn finish_auth(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackQuery>,
) -> Result<Json<AccountView>, AppError> {
    let provider: MailProvider = provider
        .parse()
        .map_err(|e: String| AppError::bad_request(&e))?;

    let user_id = state
        .auth_states
        .take(&params.state)
        .ok_or_else(|| AppError::unauthorized("Unknown or expired authorization state"))?;

    let client = configured_client(&state, provider)?;

    let grant = client
        .exchange_code(&params.code)
        .await
        .map_err(core_error)?;

    let account = state
        .sync
        .token_manager()
        .connect_account(
            user_id,
            client.as_ref(),
            &grant,
            state.sync.config().lookback_days,
        )
        .await
        .map_err(core_error)?;

    Ok(Json(AccountView::from(&account)))
}

fn configured_client(
    state: &Arc<AppState>,
    provider: MailProvider,
) -> Result<Arc<dyn ProviderClient>, AppError> {
    state
        .sync
        .client(provider)
        .map_err(|_| AppError::bad_request(&format!("OAuth is not configured for {}", provider)))
}
