//! 进行中请求的指标追踪

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::ollama::ChatMessage;

use super::model::{NewRequestRecord, RequestStatus};
use super::store::MetricsStore;
use super::tokens::{estimate_message_tokens, estimate_tokens};

/// 进行中请求的记账条目
#[derive(Debug)]
struct ActiveRequest {
    started: Instant,
    input_tokens: i64,
    model: String,
}

/// 一次请求结束时的信息
#[derive(Debug, Clone)]
pub struct Completion {
    pub response_text: String,
    pub streaming_duration: Option<Duration>,
    pub status: RequestStatus,
    pub error_message: Option<String>,
}

impl Completion {
    pub fn success(response_text: impl Into<String>, streaming_duration: Duration) -> Self {
        Self {
            response_text: response_text.into(),
            streaming_duration: Some(streaming_duration),
            status: RequestStatus::Success,
            error_message: None,
        }
    }

    pub fn error(
        response_text: impl Into<String>,
        streaming_duration: Duration,
        message: impl Into<String>,
    ) -> Self {
        Self {
            response_text: response_text.into(),
            streaming_duration: Some(streaming_duration),
            status: RequestStatus::Error,
            error_message: Some(message.into()),
        }
    }
}

/// 指标追踪器
///
/// 进程内共享一个实例。`start` 登记请求，`end` 计算耗时与 token 并落库，
/// 条目的插入与移除都在同一把锁内完成，重复的 `end` 只会有一次生效。
pub struct MetricsTracker {
    active: Mutex<HashMap<String, ActiveRequest>>,
    store: MetricsStore,
}

impl MetricsTracker {
    pub fn new(store: MetricsStore) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            store,
        }
    }

    pub fn store(&self) -> &MetricsStore {
        &self.store
    }

    /// 登记一个新请求，返回新分配的请求 ID
    pub fn start(&self, messages: &[ChatMessage], model: &str) -> String {
        let request_id = Uuid::new_v4().to_string();
        let entry = ActiveRequest {
            started: Instant::now(),
            input_tokens: estimate_message_tokens(messages),
            model: model.to_string(),
        };
        self.active.lock().insert(request_id.clone(), entry);
        request_id
    }

    /// 结束一个请求并写入一条记录
    ///
    /// 未知的请求 ID 只记录警告并返回 `false`；写库失败只记录错误，不向调用方传播
    pub async fn end(&self, request_id: &str, completion: Completion) -> bool {
        let removed = self.active.lock().remove(request_id);
        let Some(entry) = removed else {
            tracing::warn!(request_id = %request_id, "请求不在进行中列表，忽略本次结束");
            return false;
        };

        let record = NewRequestRecord {
            request_id: request_id.to_string(),
            model: entry.model,
            input_tokens: entry.input_tokens,
            output_tokens: estimate_tokens(&completion.response_text),
            response_time_ms: entry.started.elapsed().as_millis() as i64,
            streaming_duration_ms: completion.streaming_duration.map(|d| d.as_millis() as i64),
            status: completion.status,
            error_message: completion.error_message,
            timestamp: None,
        };

        tracing::info!(
            request_id = %request_id,
            model = %record.model,
            status = %record.status,
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            response_time_ms = record.response_time_ms,
            "请求结束"
        );

        if let Err(e) = self.store.insert(record).await {
            tracing::error!(request_id = %request_id, "保存请求指标失败: {:#}", e);
        }
        true
    }

    /// 当前进行中的请求数
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}
