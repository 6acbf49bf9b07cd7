//! 应用共享状态与路由装配

use std::sync::Arc;
use std::time::Instant;

use axum::Router;

use crate::chat::create_chat_router;
use crate::metrics::{MetricsTracker, create_metrics_router};
use crate::ollama::OllamaClient;
use crate::system::{HostMonitor, create_system_router};

/// 应用共享状态
#[derive(Clone)]
pub struct AppState {
    /// 上游 Ollama 客户端
    pub ollama: Arc<OllamaClient>,
    /// 指标追踪器（进程内唯一实例）
    pub tracker: Arc<MetricsTracker>,
    /// 请求未指定模型时使用的模型
    pub default_model: Arc<str>,
    /// 进程启动时间
    pub started_at: Instant,
    /// 主机与进程资源采样
    pub host: Arc<HostMonitor>,
}

impl AppState {
    pub fn new(
        ollama: OllamaClient,
        tracker: MetricsTracker,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            ollama: Arc::new(ollama),
            tracker: Arc::new(tracker),
            default_model: Arc::from(default_model.into()),
            started_at: Instant::now(),
            host: Arc::new(HostMonitor::new()),
        }
    }
}

/// 装配全部 API 路由
///
/// # 端点
/// - `POST /api/chat` - 流式对话中继（SSE）
/// - `GET /api/metrics` - 请求指标查询
/// - `GET /api/system` - 系统状态
/// - `GET /api/test-ollama` - 上游连通性探测
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .nest(
            "/api",
            create_chat_router(state.clone())
                .merge(create_metrics_router(state.clone()))
                .merge(create_system_router(state)),
        )
        .layer(cors_layer())
}

/// CORS 中间件层
///
/// 允许所有来源，浏览器端页面可能由其它端口的开发服务器提供
pub fn cors_layer() -> tower_http::cors::CorsLayer {
    use tower_http::cors::{Any, CorsLayer};

    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
