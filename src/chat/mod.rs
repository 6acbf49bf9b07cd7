//! 流式对话中继
//!
//! 接收浏览器端的对话请求，转发给 Ollama，并把增量片段以 SSE 事件写回

mod handlers;
pub mod types;

use axum::{Router, routing::post};

use crate::app::AppState;

use handlers::post_chat;

pub use types::RelayEvent;

/// 创建对话路由
pub fn create_chat_router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(post_chat))
        .with_state(state)
}
