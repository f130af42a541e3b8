use axum::Json;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::api::Success;
use crate::error::GatewayError;
use crate::usage::UsageRecord;
use crate::usage::store::UsageTotals;

const MAX_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub user_id: Option<String>,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub data: Vec<UsageRecord>,
    /// Persisted totals for `user_id`, when filtered and a store is attached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totals: Option<UsageTotals>,
}

/// GET /admin/usage?limit=&user_id=
///
/// Most recent records from the in-memory ring, newest first.
pub async fn query_usage(
    State(state): State<AppState>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<Success<UsageResponse>>, GatewayError> {
    let limit = query.limit.min(MAX_LIMIT);
    let mut data = state.gateway.recent_usage(MAX_LIMIT);
    if let Some(ref user_id) = query.user_id {
        data.retain(|r| &r.user_id == user_id);
    }
    data.truncate(limit);

    let totals = match (&query.user_id, &state.usage_store) {
        (Some(user_id), Some(store)) => Some(
            store
                .totals_for_user(user_id)
                .map_err(|e| GatewayError::Internal(e.to_string()))?,
        ),
        _ => None,
    };

    Ok(Json(Success::new(UsageResponse { data, totals })))
}
