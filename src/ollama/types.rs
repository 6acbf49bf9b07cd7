//! Ollama API 类型定义

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 对话消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// `POST /api/chat` 请求体
#[derive(Debug, Serialize)]
pub(super) struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub stream: bool,
}

/// 流式响应中的一行
///
/// 正常行形如 `{"message":{"content":"..."},"done":false}`，
/// 出错时为 `{"error":"..."}`，也可能是 `{"error":{"message":"..."}}` 等其它形状
#[derive(Debug, Default, Deserialize)]
pub(super) struct ChatChunk {
    #[serde(default)]
    pub message: Option<ChunkMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<Value>,
}

impl ChatChunk {
    /// 取出错误信息；`null`、`false` 与空字符串视为没有错误
    pub fn error_message(&self) -> Option<String> {
        match self.error.as_ref()? {
            Value::Null | Value::Bool(false) => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            Value::Object(detail) => match detail.get("message") {
                Some(Value::String(message)) => Some(message.clone()),
                _ => Some(Value::Object(detail.clone()).to_string()),
            },
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ChunkMessage {
    #[serde(default)]
    pub content: String,
}

/// `GET /api/tags` 响应
#[derive(Debug, Deserialize)]
pub(super) struct TagsResponse {
    #[serde(default)]
    pub models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ModelEntry {
    pub name: String,
}

/// 一次流式对话的结果
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// 按到达顺序拼接的完整回复
    pub full_response: String,
    /// 收到的非空片段数
    pub fragments: usize,
    /// 从发起请求到读完流的耗时
    pub duration: std::time::Duration,
}
