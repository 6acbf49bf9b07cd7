//! Ollama 流式客户端

use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::Client;

use crate::codec::{DEFAULT_MAX_LINE_BYTES, Frame, JsonLineDecoder, LineError};
use crate::common::preview;
use crate::http_client::build_client;
use crate::model::config::Config;

use super::error::UpstreamError;
use super::types::{ChatChunk, ChatMessage, ChatOutcome, ChatRequest, TagsResponse};

/// Ollama HTTP 客户端
///
/// 进程启动时构建一次，由各请求共享（reqwest::Client 内部是连接池）
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    read_timeout: Duration,
    probe_timeout: Duration,
    max_line_bytes: usize,
}

/// 读取循环中的累积状态
#[derive(Default)]
struct StreamState {
    full_response: String,
    fragments: usize,
}

impl OllamaClient {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        read_timeout: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            read_timeout,
            probe_timeout,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    /// 流中单行的字节上限，超过即中止读取
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = build_client(config.proxy_url.as_deref(), config.connect_timeout_secs)?;
        Ok(Self::new(
            client,
            config.ollama_base_url(),
            Duration::from_secs(config.upstream_timeout_secs),
            Duration::from_secs(config.probe_timeout_secs),
        )
        .with_max_line_bytes(config.max_line_bytes))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 连通性探测：`GET /api/tags` 返回 2xx 即视为可用
    pub async fn check_connection(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::warn!("Ollama 连通性检查失败: {}", e);
                false
            }
        }
    }

    /// 列出上游已安装的模型
    pub async fn list_models(&self) -> anyhow::Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self
            .client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await?
            .error_for_status()?;
        let tags: TagsResponse = resp.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// 发起一次流式对话
    ///
    /// 每解码出一个非空片段就按到达顺序调用一次 `on_fragment`，
    /// 全部读完后返回拼接好的完整回复。
    pub async fn stream_chat<F>(
        &self,
        messages: &[ChatMessage],
        model: &str,
        mut on_fragment: F,
    ) -> Result<ChatOutcome, UpstreamError>
    where
        F: FnMut(&str),
    {
        let started = Instant::now();
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model,
            messages,
            stream: true,
        };

        let send = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .json(&body)
            .send();
        let response = tokio::time::timeout(self.read_timeout, send)
            .await
            .map_err(|_| self.timeout_error())?
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Ollama API 错误: {} {}", status, preview(&body, 200));
            return Err(UpstreamError::Status { status, body });
        }

        let mut decoder = JsonLineDecoder::<ChatChunk>::new(self.max_line_bytes);
        let mut state = StreamState::default();
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::time::timeout(self.read_timeout, stream.next())
                .await
                .map_err(|_| self.timeout_error())?;
            match next {
                Some(Ok(bytes)) => {
                    for frame in decoder.push(&bytes).map_err(|e| self.line_error(e))? {
                        absorb(frame, &mut state, &mut on_fragment)?;
                    }
                }
                Some(Err(e)) => return Err(self.classify(e)),
                None => break,
            }
        }

        if let Some(frame) = decoder.finish().map_err(|e| self.line_error(e))? {
            absorb(frame, &mut state, &mut on_fragment)?;
        }

        if state.fragments == 0 {
            return Err(UpstreamError::EmptyResponse);
        }

        let duration = started.elapsed();
        tracing::debug!(
            fragments = state.fragments,
            length = state.full_response.len(),
            "Ollama 流读取完成，耗时 {:?}",
            duration
        );
        Ok(ChatOutcome {
            full_response: state.full_response,
            fragments: state.fragments,
            duration,
        })
    }

    fn timeout_error(&self) -> UpstreamError {
        UpstreamError::Timeout {
            after: self.read_timeout,
        }
    }

    fn line_error(&self, e: LineError) -> UpstreamError {
        tracing::error!("Ollama 流中出现超长行，放弃读取: {}", e);
        UpstreamError::from(e)
    }

    fn classify(&self, e: reqwest::Error) -> UpstreamError {
        if e.is_connect() {
            tracing::error!("无法连接 Ollama ({}): {}", self.base_url, e);
            UpstreamError::Connect {
                base_url: self.base_url.clone(),
            }
        } else if e.is_timeout() {
            self.timeout_error()
        } else {
            UpstreamError::Transport(e.to_string())
        }
    }
}

/// 处理一帧：错误字段立即中止，非空内容累积并回调，无法解析的行跳过
fn absorb<F: FnMut(&str)>(
    frame: Frame<ChatChunk>,
    state: &mut StreamState,
    on_fragment: &mut F,
) -> Result<(), UpstreamError> {
    match frame {
        Frame::Value(chunk) => {
            if let Some(error) = chunk.error_message() {
                tracing::error!("Ollama 返回错误: {}", error);
                return Err(UpstreamError::Protocol(error));
            }
            let content = chunk.message.map(|m| m.content).unwrap_or_default();
            if !content.is_empty() {
                state.full_response.push_str(&content);
                state.fragments += 1;
                on_fragment(&content);
            }
            if chunk.done {
                tracing::debug!("Ollama 标记 done，继续读取剩余数据");
            }
        }
        Frame::Malformed { line, error } => {
            // 尚未收到任何内容且看起来不是 JSON，多半是网关返回了别的东西
            if state.fragments == 0 && !line.trim_start().starts_with('{') {
                tracing::warn!("跳过非 JSON 行: {}", preview(&line, 50));
            } else {
                tracing::debug!("跳过无法解析的行: {}", error);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;

    fn client_for(base_url: &str, read_timeout: Duration) -> OllamaClient {
        OllamaClient::new(
            build_client(None, 2).unwrap(),
            base_url,
            read_timeout,
            Duration::from_secs(2),
        )
    }

    async fn collect(
        client: &OllamaClient,
        messages: &[ChatMessage],
    ) -> (Result<ChatOutcome, UpstreamError>, Vec<String>) {
        let mut fragments = Vec::new();
        let result = client
            .stream_chat(messages, "llama3", |f| fragments.push(f.to_string()))
            .await;
        (result, fragments)
    }

    #[tokio::test]
    async fn test_stream_chat_relays_fragments_in_order() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/chat")
                    .body_includes("\"stream\":true")
                    .body_includes("\"model\":\"llama3\"")
                    .body_includes("\"content\":\"hi\"");
                then.status(200)
                    .header("content-type", "application/x-ndjson")
                    .body(concat!(
                        "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
                        "{\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":true}\n",
                    ));
            })
            .await;

        let client = client_for(&server.base_url(), Duration::from_secs(5));
        let (result, fragments) = collect(&client, &[ChatMessage::user("hi")]).await;

        mock.assert_async().await;
        let outcome = result.unwrap();
        assert_eq!(fragments, vec!["Hel", "lo"]);
        assert_eq!(outcome.full_response, "Hello");
        assert_eq!(outcome.fragments, 2);
    }

    #[tokio::test]
    async fn test_stream_chat_parses_unterminated_last_line() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(200).body(concat!(
                    "{\"message\":{\"content\":\"a\"}}\n",
                    "not json at all\n",
                    "{\"message\":{\"content\":\"\"}}\n",
                    "{\"message\":{\"content\":\"b\"},\"done\":true}",
                ));
            })
            .await;

        let client = client_for(&server.base_url(), Duration::from_secs(5));
        let (result, fragments) = collect(&client, &[ChatMessage::user("x")]).await;

        assert_eq!(fragments, vec!["a", "b"]);
        assert_eq!(result.unwrap().full_response, "ab");
    }

    #[tokio::test]
    async fn test_stream_chat_error_field_aborts() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(200).body(concat!(
                    "{\"message\":{\"content\":\"partial\"}}\n",
                    "{\"error\":\"model 'llama3' not found\"}\n",
                    "{\"message\":{\"content\":\"never\"}}\n",
                ));
            })
            .await;

        let client = client_for(&server.base_url(), Duration::from_secs(5));
        let (result, fragments) = collect(&client, &[ChatMessage::user("x")]).await;

        assert_eq!(fragments, vec!["partial"]);
        match result {
            Err(UpstreamError::Protocol(msg)) => assert_eq!(msg, "model 'llama3' not found"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_chat_structured_error_aborts() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(200)
                    .body("{\"error\":{\"message\":\"model overloaded\",\"code\":503}}\n");
            })
            .await;

        let client = client_for(&server.base_url(), Duration::from_secs(5));
        let (result, fragments) = collect(&client, &[ChatMessage::user("x")]).await;

        assert!(fragments.is_empty());
        match result {
            Err(UpstreamError::Protocol(msg)) => assert_eq!(msg, "model overloaded"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_chat_oversized_line_aborts() {
        let server = MockServer::start_async().await;
        let body = format!(
            "{{\"message\":{{\"content\":\"ok\"}}}}\n{}",
            "x".repeat(4096)
        );
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(200).body(body);
            })
            .await;

        let client =
            client_for(&server.base_url(), Duration::from_secs(5)).with_max_line_bytes(1024);
        let (result, fragments) = collect(&client, &[ChatMessage::user("x")]).await;

        assert!(fragments.len() <= 1);
        match result {
            Err(UpstreamError::LineTooLong { limit }) => assert_eq!(limit, 1024),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_chat_empty_body_is_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(200).body("");
            })
            .await;

        let client = client_for(&server.base_url(), Duration::from_secs(5));
        let (result, fragments) = collect(&client, &[ChatMessage::user("x")]).await;

        assert!(fragments.is_empty());
        assert!(matches!(result, Err(UpstreamError::EmptyResponse)));
    }

    #[tokio::test]
    async fn test_stream_chat_non_success_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(502).body("Bad Gateway");
            })
            .await;

        let client = client_for(&server.base_url(), Duration::from_secs(5));
        let (result, _) = collect(&client, &[ChatMessage::user("x")]).await;

        match result {
            Err(UpstreamError::Status { status, body }) => {
                assert_eq!(status, reqwest::StatusCode::BAD_GATEWAY);
                assert_eq!(body, "Bad Gateway");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_chat_times_out() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(200)
                    .delay(Duration::from_millis(800))
                    .body("{\"message\":{\"content\":\"late\"}}\n");
            })
            .await;

        let client = client_for(&server.base_url(), Duration::from_millis(100));
        let (result, fragments) = collect(&client, &[ChatMessage::user("x")]).await;

        assert!(fragments.is_empty());
        assert!(matches!(result, Err(UpstreamError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_stream_chat_connection_refused() {
        // 先占用一个端口再释放，确保没有服务监听
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let client = client_for(&base_url, Duration::from_secs(5));
        let (result, _) = collect(&client, &[ChatMessage::user("x")]).await;

        match result {
            Err(UpstreamError::Connect { base_url: reported }) => assert_eq!(reported, base_url),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_check_connection_and_list_models() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/tags");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"models":[{"name":"llama3:8b"},{"name":"gpt-oss:120b-cloud"}]}"#);
            })
            .await;

        let client = client_for(&server.base_url(), Duration::from_secs(5));
        assert!(client.check_connection().await);
        assert_eq!(
            client.list_models().await.unwrap(),
            vec!["llama3:8b", "gpt-oss:120b-cloud"]
        );

        let down = client_for("http://127.0.0.1:9", Duration::from_secs(5));
        assert!(!down.check_connection().await);
    }
}
