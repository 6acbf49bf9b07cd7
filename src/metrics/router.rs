//! Metrics API 路由

use axum::{Router, routing::get};

use crate::app::AppState;

use super::handlers::get_metrics;

/// 创建 Metrics API 路由
pub fn create_metrics_router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .with_state(state)
}
