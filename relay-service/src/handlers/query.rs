use crate::models::{QueryRequest, QueryResponse};
use crate::services::RelayError;
use crate::startup::AppState;
use axum::{Json, extract::State, extract::rejection::JsonRejection};
use service_core::error::AppError;

/// `POST /query-ai`: answer a query for an address with remaining credit.
pub async fn query_ai(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::debug!(error = %rejection, "Rejected request body");
        crate::services::metrics::record_request("invalid_request");
        RelayError::InvalidRequest
    })?;

    let outcome = state.relay.handle(request).await?;

    Ok(Json(QueryResponse {
        result: outcome.result,
        billing: outcome.billing,
    }))
}
