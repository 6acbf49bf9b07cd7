//! Metrics API 请求/响应类型

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::{RequestRecord, RequestStatus};

/// 数据库中时间戳的存储格式（UTC，与 SQLite CURRENT_TIMESTAMP 一致）
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 单次查询最多返回的记录数
const MAX_LIMIT: u32 = 10_000;

/// `GET /api/metrics` 查询参数
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub model: Option<String>,
    pub status: Option<String>,
    /// 以字符串接收，非法值在 `into_filter` 中报错
    pub limit: Option<String>,
    pub interval: Option<String>,
}

/// 时间序列的分桶粒度
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Interval {
    #[default]
    Hour,
    Day,
}

impl Interval {
    /// 对应的 SQLite 分桶表达式
    pub(super) fn bucket_sql(&self) -> &'static str {
        match self {
            Interval::Hour => "strftime('%Y-%m-%d %H:00:00', timestamp)",
            Interval::Day => "date(timestamp)",
        }
    }
}

/// 规范化后的过滤条件，各条件之间为 AND
#[derive(Debug, Clone, Default)]
pub struct MetricsFilter {
    pub start: Option<String>,
    pub end: Option<String>,
    pub model: Option<String>,
    pub status: Option<RequestStatus>,
    /// 只作用于记录列表
    pub limit: Option<u32>,
}

impl MetricsFilter {
    pub fn since(start: DateTime<Utc>) -> Self {
        Self {
            start: Some(start.format(TIMESTAMP_FORMAT).to_string()),
            ..Default::default()
        }
    }
}

/// 时间边界：纯日期作为起点取当天 00:00:00，作为终点取 23:59:59
#[derive(Clone, Copy)]
enum Bound {
    Start,
    End,
}

/// 把调用方给出的时间转成存储格式
///
/// 接受 RFC3339、`YYYY-MM-DD HH:MM:SS`、`YYYY-MM-DDTHH:MM:SS`（视为 UTC）和 `YYYY-MM-DD`
fn normalize_timestamp(raw: &str, bound: Bound) -> Option<String> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc).format(TIMESTAMP_FORMAT).to_string());
    }
    for fmt in [TIMESTAMP_FORMAT, "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.format(TIMESTAMP_FORMAT).to_string());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let time = match bound {
            Bound::Start => "00:00:00",
            Bound::End => "23:59:59",
        };
        return Some(format!("{} {}", date.format("%Y-%m-%d"), time));
    }
    None
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl MetricsQuery {
    /// 校验并转换为过滤条件与分桶粒度，错误信息直接返回给调用方
    pub fn into_filter(self) -> Result<(MetricsFilter, Interval), String> {
        let start = match non_empty(self.start_date) {
            Some(raw) => Some(
                normalize_timestamp(&raw, Bound::Start)
                    .ok_or_else(|| format!("Invalid startDate: {}", raw))?,
            ),
            None => None,
        };
        let end = match non_empty(self.end_date) {
            Some(raw) => Some(
                normalize_timestamp(&raw, Bound::End)
                    .ok_or_else(|| format!("Invalid endDate: {}", raw))?,
            ),
            None => None,
        };
        let status = match non_empty(self.status) {
            Some(raw) => Some(raw.parse::<RequestStatus>().map_err(|_| {
                format!("Invalid status: {} (expected success or error)", raw)
            })?),
            None => None,
        };
        let limit = match non_empty(self.limit) {
            Some(raw) => Some(raw.parse::<u32>().map_err(|_| {
                format!("Invalid limit: {} (expected a non-negative integer)", raw)
            })?),
            None => None,
        };
        let interval = match non_empty(self.interval).as_deref() {
            None | Some("hour") => Interval::Hour,
            Some("day") => Interval::Day,
            Some(other) => return Err(format!("Invalid interval: {} (expected hour or day)", other)),
        };

        let filter = MetricsFilter {
            start,
            end,
            model: non_empty(self.model),
            status,
            limit: limit.filter(|l| *l > 0).map(|l| l.min(MAX_LIMIT)),
        };
        Ok((filter, interval))
    }
}

/// 汇总统计
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub total_requests: u64,
    pub avg_response_time: f64,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    /// 输出 tokens / 秒（总输出 token ÷ 总响应时间）
    pub avg_throughput: f64,
    pub error_count: u64,
}

/// 时间序列中的一个分桶
#[derive(Debug, Clone, Serialize)]
pub struct TimeBucket {
    pub time_bucket: String,
    pub request_count: u64,
    pub avg_response_time: f64,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

/// 按模型的分布
#[derive(Debug, Clone, Serialize)]
pub struct ModelShare {
    pub model: String,
    pub count: u64,
    pub total_tokens: i64,
}

/// `GET /api/metrics` 响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub requests: Vec<RequestRecord>,
    pub stats: Stats,
    pub time_series: Vec<TimeBucket>,
    pub model_distribution: Vec<ModelShare>,
}
