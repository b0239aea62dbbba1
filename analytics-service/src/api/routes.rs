use std::sync::Arc;

use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, patch, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::api::{handlers, middleware::track_metrics, state::AppState};
use crate::config::ServerConfig;

fn cors(server: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if server.cors_allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = server
        .cors_allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

pub fn create_router(state: Arc<AppState>, server: &ServerConfig) -> Router {
    Router::new()
        .route("/api", get(handlers::health::root))
        .route("/api/", get(handlers::health::root))
        .route("/api/health", get(handlers::health::health_check))
        .route("/api/health/live", get(handlers::health::liveness))
        .route("/api/health/ready", get(handlers::health::readiness))
        .route("/api/health/detailed", get(handlers::health::detailed))
        .route("/api/auth/token", post(handlers::auth::issue_token))
        .route("/api/auth/register", post(handlers::auth::register))
        .route("/api/auth/me", get(handlers::auth::me))
        .route(
            "/api/consumption",
            get(handlers::consumption::list_readings).post(handlers::consumption::create_reading),
        )
        .route("/api/consumption/summary", get(handlers::consumption::summary))
        .route("/api/consumption/stats", get(handlers::consumption::stats))
        .route("/api/consumption/regions", get(handlers::consumption::regions))
        .route(
            "/api/consumption/:id",
            get(handlers::consumption::get_reading)
                .put(handlers::consumption::update_reading)
                .delete(handlers::consumption::delete_reading),
        )
        .route("/api/ml/detect-anomalies", post(handlers::ml::detect_anomalies))
        .route("/api/ml/forecast", post(handlers::ml::forecast))
        .route("/api/ml/anomaly-stats", post(handlers::ml::anomaly_stats))
        .route("/api/ml/anomalies", get(handlers::ml::list_anomalies))
        .route("/api/ml/anomalies/:id", patch(handlers::ml::set_confirmation))
        .layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(cors(server))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_router_creation() {
        let pool = sqlx::PgPool::connect_lazy("postgres://localhost/test").unwrap();
        let cfg = crate::config::AppConfig::default();
        let state = Arc::new(AppState::new(pool, &cfg));

        let server = ServerConfig {
            cors_allowed_origins: vec!["http://localhost:3000".to_string(), "bad\norigin".to_string()],
            ..ServerConfig::default()
        };
        let _router = create_router(state, &server);
    }
}
