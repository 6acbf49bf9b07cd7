//! 中继服务的命令行客户端
//!
//! 读取 `POST /api/chat` 的 SSE 流，带首个片段的看门狗

mod error;
mod reader;

pub use reader::RelayClient;
