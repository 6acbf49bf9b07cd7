//! Metrics API 处理器

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};

use crate::app::AppState;
use crate::common::ErrorResponse;

use super::types::{MetricsQuery, MetricsResponse};

/// GET /api/metrics
pub async fn get_metrics(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> impl IntoResponse {
    let (filter, interval) = match query.into_filter() {
        Ok(parsed) => parsed,
        Err(message) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::invalid_request(message)),
            )
                .into_response();
        }
    };

    let store = state.tracker.store();
    let result = async {
        let requests = store.requests(filter.clone()).await?;
        let stats = store.stats(filter.clone()).await?;
        let time_series = store.time_series(filter.clone(), interval).await?;
        let model_distribution = store.model_distribution(filter).await?;
        anyhow::Ok(MetricsResponse {
            requests,
            stats,
            time_series,
            model_distribution,
        })
    }
    .await;

    match result {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            tracing::error!("查询请求指标失败: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::internal(format!("Failed to get metrics: {}", e))),
            )
                .into_response()
        }
    }
}
