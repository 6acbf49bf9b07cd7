//! 中继 SSE 流的读取端

use std::time::{Duration, Instant};

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::chat::RelayEvent;
use crate::common::preview;
use crate::ollama::ChatMessage;

use super::error::ClientError;

/// 一次对话的结果
#[derive(Debug, Clone)]
pub struct ChatReply {
    /// `start` 事件里的请求 ID
    pub request_id: Option<String>,
    pub content: String,
    pub chunk_count: usize,
    pub elapsed: Duration,
    /// 按 4 字符 ≈ 1 token 粗算
    pub tokens_per_second: f64,
}

#[derive(Serialize)]
struct ChatPayload<'a> {
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

/// 连接 `POST /api/chat` 的客户端
#[derive(Debug, Clone)]
pub struct RelayClient {
    client: Client,
    base_url: String,
    stall_timeout: Duration,
}

/// 读取循环中的累积状态
#[derive(Default)]
struct ReplyState {
    request_id: Option<String>,
    content: String,
    chunk_count: usize,
    done: bool,
}

impl RelayClient {
    pub fn new(client: Client, base_url: impl Into<String>, stall_timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            stall_timeout,
        }
    }

    /// 发送对话并逐片读取回复
    ///
    /// 每收到一个 `chunk` 就用当前累计的完整文本调用一次 `on_update`。
    /// 从发出请求起到首个片段到达前受看门狗约束，到期即放弃本次读取并返回
    /// [`ClientError::Timeout`]，之后迟到的数据不会再被处理。
    pub async fn chat<F>(
        &self,
        messages: &[ChatMessage],
        model: Option<&str>,
        mut on_update: F,
    ) -> Result<ChatReply, ClientError>
    where
        F: FnMut(&str),
    {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.stall_timeout;
        let url = format!("{}/api/chat", self.base_url);

        let send = self
            .client
            .post(&url)
            .header("Accept", "text/event-stream")
            .json(&ChatPayload { messages, model })
            .send();
        let response = tokio::time::timeout_at(deadline, send)
            .await
            .map_err(|_| self.timeout_error())??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(&body).unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });
            return Err(ClientError::Status { status, message });
        }

        let mut state = ReplyState::default();
        let mut events = response.bytes_stream().eventsource();

        while !state.done {
            let next = if state.chunk_count == 0 {
                tokio::time::timeout_at(deadline, events.next())
                    .await
                    .map_err(|_| self.timeout_error())?
            } else {
                events.next().await
            };
            match next {
                Some(Ok(event)) => apply(&event, &mut state, &mut on_update)?,
                Some(Err(EventStreamError::Transport(e))) => return Err(ClientError::Transport(e)),
                Some(Err(e)) => {
                    tracing::error!("SSE 流解析失败: {}", e);
                    return Err(ClientError::Stream(e.to_string()));
                }
                None => break,
            }
        }

        if state.content.is_empty() {
            return Err(ClientError::Empty);
        }

        let elapsed = started.elapsed();
        let tokens_per_second = if elapsed.as_secs_f64() > 0.0 {
            state.content.chars().count() as f64 / 4.0 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        tracing::debug!(
            chunks = state.chunk_count,
            length = state.content.len(),
            "中继流读取完成，耗时 {:?}",
            elapsed
        );

        Ok(ChatReply {
            request_id: state.request_id,
            content: state.content,
            chunk_count: state.chunk_count,
            elapsed,
            tokens_per_second,
        })
    }

    fn timeout_error(&self) -> ClientError {
        tracing::error!("{:?} 内没有收到任何片段，放弃等待", self.stall_timeout);
        ClientError::Timeout {
            after: self.stall_timeout,
        }
    }
}

/// 处理一个事件：`chunk` 累积并回调，`done` 结束，`error` 中止
///
/// 多行 `data:` 已由 eventsource 解析器拼接，这里只看拼好的 `data`
fn apply<F: FnMut(&str)>(
    event: &Event,
    state: &mut ReplyState,
    on_update: &mut F,
) -> Result<(), ClientError> {
    if event.data.trim().is_empty() {
        return Ok(());
    }
    let relay_event = match serde_json::from_str::<RelayEvent>(&event.data) {
        Ok(relay_event) => relay_event,
        Err(e) => {
            tracing::warn!("无法解析 SSE 数据: {} ({})", preview(&event.data, 100), e);
            return Ok(());
        }
    };

    match relay_event {
        RelayEvent::Start { request_id } => {
            tracing::debug!(request_id = %request_id, "中继流开始");
            state.request_id = Some(request_id);
        }
        RelayEvent::Chunk { content } => {
            if !content.is_empty() {
                state.content.push_str(&content);
                state.chunk_count += 1;
                on_update(&state.content);
            }
        }
        RelayEvent::Done { .. } => state.done = true,
        RelayEvent::Error { error } => return Err(ClientError::Server(error)),
    }
    Ok(())
}

/// 从错误响应体中取出提示信息，兼容 `{"error": "..."}` 与 `{"error": {"message": "..."}}`
fn error_message(body: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        match value.get("error") {
            Some(Value::String(message)) => return Some(message.clone()),
            Some(Value::Object(detail)) => {
                if let Some(Value::String(message)) = detail.get("message") {
                    return Some(message.clone());
                }
            }
            _ => {}
        }
    }
    let body = body.trim();
    (!body.is_empty()).then(|| body.to_string())
}
