//! 系统状态与上游探测接口

mod handlers;
mod host;

pub use host::HostMonitor;

use axum::{Router, routing::get};

use crate::app::AppState;

use handlers::{get_system_info, test_ollama};

/// 创建系统状态路由
pub fn create_system_router(state: AppState) -> Router {
    Router::new()
        .route("/system", get(get_system_info))
        .route("/test-ollama", get(test_ollama))
        .with_state(state)
}
