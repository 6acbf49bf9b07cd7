//! 中继客户端错误

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// 中继服务在开始推流前拒绝了请求
    #[error("HTTP {status}: {message}")]
    Status { status: StatusCode, message: String },

    /// 流中收到 `error` 事件
    #[error("{0}")]
    Server(String),

    /// SSE 帧本身无法解析（非法 UTF-8 等）
    #[error("Malformed event stream from the relay: {0}")]
    Stream(String),

    /// 看门狗到期前没有收到任何片段
    #[error(
        "Request timeout. The model may be taking too long to respond or there is a connection issue. (no data within {after:?})"
    )]
    Timeout { after: Duration },

    /// 流结束但没有任何内容
    #[error("No response received from server. Please check if Ollama is running and the model exists.")]
    Empty,

    #[error("Failed to reach the relay: {0}")]
    Transport(#[from] reqwest::Error),
}
