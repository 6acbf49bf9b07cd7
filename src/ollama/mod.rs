//! Ollama 上游客户端
//!
//! 提供流式对话读取、连通性探测和模型列表

mod client;
mod error;
pub mod types;

pub use client::OllamaClient;
pub use types::ChatMessage;
