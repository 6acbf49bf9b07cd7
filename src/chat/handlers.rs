//! 对话中继处理器

use std::convert::Infallible;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Json, Response,
        sse::{KeepAlive, Sse},
    },
};
use tokio::sync::mpsc;

use crate::app::AppState;
use crate::common::ErrorResponse;
use crate::metrics::Completion;
use crate::ollama::ChatMessage;

use super::types::{ChatBody, RelayEvent};

/// POST /api/chat
///
/// 校验通过后立即返回 SSE 响应；上游读取在独立任务中进行，
/// 从这里开始所有错误都以 `error` 事件的形式写回流中
pub async fn post_chat(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match ChatBody::parse(&body) {
        Ok(request) => request,
        Err(message) => {
            tracing::warn!("对话请求校验失败: {}", message);
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::invalid_request(message)),
            )
                .into_response();
        }
    };

    let model = request
        .model
        .unwrap_or_else(|| state.default_model.to_string());
    let request_id = state.tracker.start(&request.messages, &model);
    tracing::info!(
        request_id = %request_id,
        model = %model,
        messages = request.messages.len(),
        "开始中继对话"
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(RelayEvent::Start {
        request_id: request_id.clone(),
    });
    tokio::spawn(relay(state, request_id, request.messages, model, tx));

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|event| (Ok::<_, Infallible>(event.to_sse()), rx))
    });

    (
        [(header::CONNECTION, HeaderValue::from_static("keep-alive"))],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

/// 驱动上游读取，把片段转发为 `chunk` 事件，结束时先落库再发送终止事件
///
/// 上游没有返回任何内容时 `stream_chat` 给出 `EmptyResponse`，与其它失败一样走 `error` 事件
///
/// 客户端断开后发送会失败，但读取照常进行直到上游结束，指标仍会被记录
async fn relay(
    state: AppState,
    request_id: String,
    messages: Vec<ChatMessage>,
    model: String,
    tx: mpsc::UnboundedSender<RelayEvent>,
) {
    let started = Instant::now();
    let mut relayed = String::new();
    let mut chunk_count = 0usize;

    let result = state
        .ollama
        .stream_chat(&messages, &model, |fragment| {
            chunk_count += 1;
            relayed.push_str(fragment);
            tracing::debug!(
                request_id = %request_id,
                "片段 {} 长度 {}，累计 {}",
                chunk_count,
                fragment.len(),
                relayed.len()
            );
            let _ = tx.send(RelayEvent::Chunk {
                content: fragment.to_string(),
            });
        })
        .await;
    let streaming_duration = started.elapsed();

    let terminal = match result {
        Ok(outcome) => {
            tracing::info!(
                request_id = %request_id,
                fragments = outcome.fragments,
                length = outcome.full_response.len(),
                "中继完成，上游耗时 {:?}",
                outcome.duration
            );
            state
                .tracker
                .end(
                    &request_id,
                    Completion::success(outcome.full_response, streaming_duration),
                )
                .await;
            RelayEvent::Done {
                request_id: request_id.clone(),
            }
        }
        Err(e) => {
            tracing::error!(
                request_id = %request_id,
                kind = e.kind(),
                chunks = chunk_count,
                "中继失败: {}",
                e
            );
            let message = e.to_string();
            state
                .tracker
                .end(
                    &request_id,
                    Completion::error(relayed, streaming_duration, message.clone()),
                )
                .await;
            RelayEvent::Error { error: message }
        }
    };

    if tx.send(terminal).is_err() {
        tracing::debug!(request_id = %request_id, "客户端已断开，终止事件未送达");
    }
}
