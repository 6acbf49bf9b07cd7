//! 上游调用错误分类

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

use crate::codec::LineError;

#[derive(Debug, Error)]
pub enum UpstreamError {
    /// 无法建立连接（地址不可达、拒绝连接、连接超时）
    #[error("Cannot connect to the Ollama server. Check the URL: {base_url}")]
    Connect { base_url: String },

    /// 上游返回非 2xx
    #[error("{}", describe_status(.status, .body))]
    Status { status: StatusCode, body: String },

    /// 单行超过上限仍没有换行
    #[error("Ollama sent a line longer than {limit} bytes; the stream was aborted")]
    LineTooLong { limit: usize },

    /// 流中出现显式的 error 字段
    #[error("Ollama error: {0}")]
    Protocol(String),

    /// 流结束但没有任何内容
    #[error("No response received from Ollama. The model may not be responding.")]
    EmptyResponse,

    /// 超过读取空闲时限
    #[error("Connection timed out: no data from Ollama within {after:?}")]
    Timeout { after: Duration },

    /// 读取过程中的其它传输错误
    #[error("Failed to read the Ollama response stream: {0}")]
    Transport(String),
}

fn describe_status(status: &StatusCode, body: &str) -> String {
    match *status {
        StatusCode::NOT_FOUND | StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => {
            format!(
                "Cannot reach the Ollama server. Make sure Ollama is running and the tunnel is up. ({})",
                status
            )
        }
        _ => format!("Ollama API error: {} - {}", status, body.trim()),
    }
}

impl From<LineError> for UpstreamError {
    fn from(e: LineError) -> Self {
        match e {
            LineError::TooLong { limit } => UpstreamError::LineTooLong { limit },
        }
    }
}

impl UpstreamError {
    /// 错误类别，用于日志字段
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Status { .. } => "status",
            Self::LineTooLong { .. } => "line_too_long",
            Self::Protocol(_) => "protocol",
            Self::EmptyResponse => "empty",
            Self::Timeout { .. } => "timeout",
            Self::Transport(_) => "transport",
        }
    }
}
