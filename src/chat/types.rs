//! 对话中继的请求体与 SSE 事件类型

use axum::response::sse::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ollama::ChatMessage;

/// 校验后的对话请求
#[derive(Debug, Clone)]
pub struct ChatBody {
    pub messages: Vec<ChatMessage>,
    /// 未指定时使用配置的默认模型
    pub model: Option<String>,
}

impl ChatBody {
    /// 解析并校验请求体：`messages` 必须存在且为消息数组，`model` 可选
    pub fn parse(raw: &[u8]) -> Result<Self, String> {
        let value: Value =
            serde_json::from_slice(raw).map_err(|_| "Invalid JSON body".to_string())?;

        let messages = match value.get("messages") {
            Some(m @ Value::Array(_)) => m.clone(),
            _ => return Err("Invalid messages".to_string()),
        };
        let messages: Vec<ChatMessage> = serde_json::from_value(messages)
            .map_err(|e| format!("Invalid messages: {}", e))?;

        let model = match value.get("model") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(s.trim().to_string()),
            Some(_) => return Err("Invalid model: expected a string".to_string()),
        };

        Ok(Self { messages, model })
    }
}

/// 发给客户端的 SSE 事件，序列化为 `{"type": ..., ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayEvent {
    Start {
        #[serde(rename = "requestId")]
        request_id: String,
    },
    Chunk {
        content: String,
    },
    Done {
        #[serde(rename = "requestId")]
        request_id: String,
    },
    Error {
        error: String,
    },
}

impl RelayEvent {
    /// 转为 `data: <json>` 帧
    pub fn to_sse(&self) -> Event {
        Event::default().json_data(self).unwrap_or_else(|e| {
            tracing::error!("序列化 SSE 事件失败: {}", e);
            Event::default().comment("serialization error")
        })
    }
}
