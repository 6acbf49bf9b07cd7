//! 系统状态 API 处理器

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;

use crate::app::AppState;
use crate::common::ErrorResponse;
use crate::metrics::types::MetricsFilter;

use super::host::{CpuInfo, MemoryInfo};

#[derive(Debug, Serialize)]
pub struct SystemInfoResponse {
    pub ollama_connected: bool,
    pub ollama_url: String,
    pub queue: QueueInfo,
    pub metrics: RecentMetrics,
    pub memory: MemoryInfo,
    pub cpu: CpuInfo,
    pub system: HostInfo,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct QueueInfo {
    pub active_requests: usize,
    /// 没有排队机制，恒为 0
    pub pending: usize,
}

/// 最近一小时的汇总
#[derive(Debug, Serialize)]
pub struct RecentMetrics {
    pub recent_requests: u64,
    pub avg_response_time: f64,
    pub avg_throughput: f64,
}

#[derive(Debug, Serialize)]
pub struct HostInfo {
    pub platform: &'static str,
    pub arch: &'static str,
    pub load_avg: [f64; 3],
    /// 主机开机时长（秒）
    pub uptime: u64,
    /// 本进程运行时长（秒）
    pub process_uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct ProbeResponse {
    pub connected: bool,
    pub models: Vec<String>,
    pub message: String,
}

/// GET /api/system
pub async fn get_system_info(State(state): State<AppState>) -> impl IntoResponse {
    let ollama_connected = state.ollama.check_connection().await;
    let since = MetricsFilter::since(Utc::now() - ChronoDuration::hours(1));

    let recent = match state.tracker.store().stats(since).await {
        Ok(stats) => stats,
        Err(e) => {
            tracing::error!("获取最近统计失败: {:#}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::internal(format!(
                    "Failed to get system info: {}",
                    e
                ))),
            )
                .into_response();
        }
    };

    let host = state.host.clone();
    let snapshot = match tokio::task::spawn_blocking(move || host.snapshot()).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::error!("采样主机资源失败: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::internal(format!(
                    "Failed to get system info: {}",
                    e
                ))),
            )
                .into_response();
        }
    };

    Json(SystemInfoResponse {
        ollama_connected,
        ollama_url: state.ollama.base_url().to_string(),
        queue: QueueInfo {
            active_requests: state.tracker.active_count(),
            pending: 0,
        },
        metrics: RecentMetrics {
            recent_requests: recent.total_requests,
            avg_response_time: recent.avg_response_time,
            avg_throughput: recent.avg_throughput,
        },
        memory: snapshot.memory,
        cpu: snapshot.cpu,
        system: HostInfo {
            platform: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            load_avg: snapshot.load_avg,
            uptime: snapshot.uptime,
            process_uptime_secs: state.started_at.elapsed().as_secs(),
        },
        timestamp: Utc::now().to_rfc3339(),
    })
    .into_response()
}

/// GET /api/test-ollama
pub async fn test_ollama(State(state): State<AppState>) -> Json<ProbeResponse> {
    let base_url = state.ollama.base_url();
    let connected = state.ollama.check_connection().await;

    let models = if connected {
        state.ollama.list_models().await.unwrap_or_else(|e| {
            tracing::warn!("获取模型列表失败: {:#}", e);
            Vec::new()
        })
    } else {
        Vec::new()
    };

    let message = if connected {
        let listed = if models.is_empty() {
            "none".to_string()
        } else {
            models.join(", ")
        };
        format!("Ollama is connected. Available models: {}", listed)
    } else {
        format!(
            "Ollama is not connected. Please make sure Ollama is running on {}",
            base_url
        )
    };

    Json(ProbeResponse {
        connected,
        models,
        message,
    })
}
