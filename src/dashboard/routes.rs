//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is the shared `Investor`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::engine::Investor;
use crate::error::InvestorError;
use crate::types::{Investment, LoanId, LoanState};

pub type AppState = Arc<Investor>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct InvestmentView {
    pub loan_id: String,
    pub state: LoanState,
    pub amount: Decimal,
    pub bidder: String,
    pub min_interest_rate: Decimal,
    pub balance: Option<Decimal>,
    pub refund_withdrawn: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub collected_at: Option<DateTime<Utc>>,
}

impl InvestmentView {
    fn new(id: &LoanId, inv: &Investment) -> Self {
        Self {
            loan_id: id.to_string(),
            state: inv.state,
            amount: inv.bid.amount,
            bidder: inv.bid.bidder.clone(),
            min_interest_rate: inv.bid.min_interest_rate,
            balance: inv.balance,
            refund_withdrawn: inv.refund_withdrawn,
            created_at: inv.created_at,
            updated_at: inv.updated_at,
            collected_at: inv.collected_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioResponse {
    pub running: bool,
    pub count: usize,
    /// Investments still awaiting an auction or review outcome.
    pub open: usize,
    pub committed: Decimal,
    pub by_state: BTreeMap<String, usize>,
    pub investments: Vec<InvestmentView>,
    pub watchers: usize,
}

/// Maps core errors onto HTTP status codes.
pub struct ApiError(pub InvestorError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InvestorError::UnknownInvestment(_) => StatusCode::NOT_FOUND,
            InvestorError::NotCollectable { .. } => StatusCode::CONFLICT,
            InvestorError::LedgerCallFailed { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<InvestorError> for ApiError {
    fn from(err: InvestorError) -> Self {
        ApiError(err)
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/portfolio
pub async fn get_portfolio(State(investor): State<AppState>) -> Json<PortfolioResponse> {
    let snapshot = investor.snapshot().await;

    let mut by_state = BTreeMap::new();
    let mut committed = Decimal::ZERO;
    let mut open = 0;
    let investments: Vec<InvestmentView> = snapshot
        .iter()
        .map(|(id, inv)| {
            *by_state.entry(inv.state.to_string()).or_insert(0) += 1;
            if !inv.state.is_terminal() {
                open += 1;
            }
            if !inv.refund_withdrawn {
                committed += inv.bid.amount;
            }
            InvestmentView::new(id, inv)
        })
        .collect();

    Json(PortfolioResponse {
        running: investor.is_running(),
        count: investments.len(),
        open,
        committed,
        by_state,
        investments,
        watchers: investor.watchers().len(),
    })
}

/// GET /api/investments/:loan_id
pub async fn get_investment(
    State(investor): State<AppState>,
    Path(loan_id): Path<String>,
) -> Result<Json<InvestmentView>, ApiError> {
    let id = LoanId::new(loan_id);
    let position = investor
        .position(&id)
        .await
        .ok_or_else(|| InvestorError::UnknownInvestment(id.clone()))?;
    Ok(Json(InvestmentView::new(&id, &position.investment)))
}

/// POST /api/investments/:loan_id/collect
pub async fn collect(
    State(investor): State<AppState>,
    Path(loan_id): Path<String>,
) -> Result<Json<InvestmentView>, ApiError> {
    let id = LoanId::new(loan_id);
    let updated = investor.collect(&id).await?;
    Ok(Json(InvestmentView::new(&id, &updated)))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}
