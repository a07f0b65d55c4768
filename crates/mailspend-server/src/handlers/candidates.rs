//! Extracted candidate handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use mailspend_core::{CandidateState, ExtractedCandidate};

use crate::{get_user_id, AppError, AppState, SuccessResponse, MAX_PAGE_LIMIT};

use super::owned_account;

const DEFAULT_PAGE_LIMIT: i64 = 50;

/// Window for the rolling extraction stats
const STATS_WINDOW_DAYS: i64 = 30;

#[derive(Deserialize)]
pub struct ListCandidatesQuery {
    pub account_id: i64,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
pub struct CandidatePage {
    pub candidates: Vec<ExtractedCandidate>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// GET /api/candidates?account_id=N - Paged candidates for one account
pub async fn list_candidates(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListCandidatesQuery>,
    headers: HeaderMap,
) -> Result<Json<CandidatePage>, AppError> {
    let user_id = get_user_id(&headers)?;

    let account = owned_account(&state, user_id, query.account_id)?;

    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);

    let candidates = state.db.candidates_for_account(account.id, limit, offset)?;
    let total = state.db.count_candidates_for_account(account.id)?;

    Ok(Json(CandidatePage {
        candidates,
        total,
        limit,
        offset,
    }))
}

/// GET /api/candidates/unprocessed - Unprocessed candidates across all of
/// the caller's accounts, for review UIs
pub async fn list_unprocessed(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ExtractedCandidate>>, AppError> {
    let user_id = get_user_id(&headers)?;

    Ok(Json(state.db.unprocessed_for_user(user_id)?))
}

/// POST /api/candidates/:id/reject - Reject a candidate so the
/// materializer never picks it up
pub async fn reject_candidate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<SuccessResponse>, AppError> {
    let user_id = get_user_id(&headers)?;

    let candidate = state
        .db
        .get_candidate(id)?
        .ok_or_else(|| AppError::not_found(&format!("Candidate {} not found", id)))?;
    owned_account(&state, user_id, candidate.account_id)?;

    if candidate.state == CandidateState::Processed {
        return Err(AppError::conflict(
            "Candidate has already been materialized",
        ));
    }

    state.db.mark_candidate_failed(id, "Rejected by user")?;

    Ok(Json(SuccessResponse { success: true }))
}

/// POST /api/candidates/:id/retry - Return a failed candidate to the
/// unprocessed pool so the next materializer pass picks it up
pub async fn retry_candidate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<SuccessResponse>, AppError> {
    let user_id = get_user_id(&headers)?;

    let candidate = state
        .db
        .get_candidate(id)?
        .ok_or_else(|| AppError::not_found(&format!("Candidate {} not found", id)))?;
    owned_account(&state, user_id, candidate.account_id)?;

    // Only the failed state is retryable
    if !state.db.retry_candidate(id)? {
        return Err(AppError::conflict("Candidate is not in a failed state"));
    }

    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub active_accounts: i64,
    pub unprocessed_candidates: i64,
    pub extracted_last_30_days: i64,
    pub average_confidence_last_30_days: Option<f64>,
}

/// GET /api/stats - Extraction stats for dashboards
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatsResponse>, AppError> {
    let user_id = get_user_id(&headers)?;

    let since = Utc::now() - Duration::days(STATS_WINDOW_DAYS);

    Ok(Json(StatsResponse {
        active_accounts: state.db.count_active_accounts_for_user(user_id)?,
        unprocessed_candidates: state.db.unprocessed_for_user(user_id)?.len() as i64,
        extracted_last_30_days: state.db.count_extracted_since(since)?,
        average_confidence_last_30_days: state.db.average_confidence_since(since)?,
    }))
}
