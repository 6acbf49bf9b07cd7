//! 请求记录数据模型

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 请求最终状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(RequestStatus::Success),
            "error" => Ok(RequestStatus::Error),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// 待写入的请求记录
#[derive(Debug, Clone)]
pub struct NewRequestRecord {
    pub request_id: String,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub response_time_ms: i64,
    pub streaming_duration_ms: Option<i64>,
    pub status: RequestStatus,
    pub error_message: Option<String>,
    /// 为空时由数据库填入插入时间
    pub timestamp: Option<String>,
}

/// 已持久化的请求记录
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub id: i64,
    pub request_id: String,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub response_time_ms: i64,
    pub streaming_duration_ms: Option<i64>,
    pub timestamp: String,
    pub status: String,
    pub error_message: Option<String>,
}
