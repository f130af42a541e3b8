use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;
use crate::gateway::{ConnectionReport, ProviderHealth};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub low_cost_mode: bool,
    pub providers: BTreeMap<String, ProviderHealth>,
}

/// GET /health
///
/// Per-provider health derived from circuit breaker state. Never calls a
/// provider.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        low_cost_mode: state.config.low_cost_mode,
        providers: state.gateway.provider_health(),
    })
}

/// GET /health/connections
pub async fn test_connections(State(state): State<AppState>) -> Json<BTreeMap<String, ConnectionReport>> {
    Json(state.gateway.test_connections().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::HealthStatus;

    #[test]
    fn test_health_response_serialization() {
        let mut providers = BTreeMap::new();
        providers.insert(
            "direct".to_string(),
            ProviderHealth {
                status: HealthStatus::Unhealthy,
                failures: 3,
                uptime: 25.0,
            },
        );
        let response = HealthResponse {
            status: "ok",
            low_cost_mode: false,
            providers,
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["providers"]["direct"]["status"], "unhealthy");
        assert_eq!(json["providers"]["direct"]["failures"], 3);
    }
}
