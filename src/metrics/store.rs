//! 指标存储（SQLite）

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::Connection;
use rusqlite::types::ToSql;

use super::model::{NewRequestRecord, RequestRecord};
use super::types::{Interval, MetricsFilter, ModelShare, Stats, TimeBucket};

/// 底层 SQLite 存储（同步）
struct SqliteMetrics {
    conn: Mutex<Connection>,
}

/// 由过滤条件生成的 WHERE 子句与参数
struct WhereClause {
    sql: String,
    params: Vec<Box<dyn ToSql>>,
}

impl WhereClause {
    fn build(filter: &MetricsFilter) -> Self {
        let mut clauses = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(ref start) = filter.start {
            clauses.push(format!("timestamp >= ?{}", params.len() + 1));
            params.push(Box::new(start.clone()));
        }
        if let Some(ref end) = filter.end {
            clauses.push(format!("timestamp <= ?{}", params.len() + 1));
            params.push(Box::new(end.clone()));
        }
        if let Some(ref model) = filter.model {
            clauses.push(format!("model = ?{}", params.len() + 1));
            params.push(Box::new(model.clone()));
        }
        if let Some(status) = filter.status {
            clauses.push(format!("status = ?{}", params.len() + 1));
            params.push(Box::new(status.as_str()));
        }

        let sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        Self { sql, params }
    }

    fn params(&self) -> impl rusqlite::Params + '_ {
        rusqlite::params_from_iter(self.params.iter().map(|p| p.as_ref()))
    }
}

impl SqliteMetrics {
    fn open(db_path: &Path) -> Result<Self> {
        if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("创建数据目录失败: {}", dir.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("打开指标数据库失败: {}", db_path.display()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                request_id TEXT UNIQUE NOT NULL,
                model TEXT NOT NULL,
                input_tokens INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                response_time_ms INTEGER NOT NULL,
                streaming_duration_ms INTEGER,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
                status TEXT DEFAULT 'success',
                error_message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_timestamp ON requests(timestamp);
            CREATE INDEX IF NOT EXISTS idx_model ON requests(model);
            CREATE INDEX IF NOT EXISTS idx_request_id ON requests(request_id);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, record: &NewRequestRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO requests (request_id, model, input_tokens, output_tokens, response_time_ms, streaming_duration_ms, status, error_message, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, COALESCE(?9, CURRENT_TIMESTAMP))",
            rusqlite::params![
                record.request_id,
                record.model,
                record.input_tokens,
                record.output_tokens,
                record.response_time_ms,
                record.streaming_duration_ms,
                record.status.as_str(),
                record.error_message,
                record.timestamp,
            ],
        )?;
        Ok(())
    }

    fn requests(&self, filter: &MetricsFilter) -> Result<Vec<RequestRecord>> {
        let conn = self.conn.lock();
        let mut clause = WhereClause::build(filter);
        let mut sql = format!(
            "SELECT id, request_id, model, input_tokens, output_tokens, response_time_ms, streaming_duration_ms, timestamp, status, error_message
             FROM requests {} ORDER BY timestamp DESC, id DESC",
            clause.sql
        );
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT ?{}", clause.params.len() + 1));
            clause.params.push(Box::new(limit as i64));
        }

        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(clause.params(), |row| {
                Ok(RequestRecord {
                    id: row.get(0)?,
                    request_id: row.get(1)?,
                    model: row.get(2)?,
                    input_tokens: row.get(3)?,
                    output_tokens: row.get(4)?,
                    response_time_ms: row.get(5)?,
                    streaming_duration_ms: row.get(6)?,
                    timestamp: row.get(7)?,
                    status: row.get(8)?,
                    error_message: row.get(9)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn stats(&self, filter: &MetricsFilter) -> Result<Stats> {
        let conn = self.conn.lock();
        let clause = WhereClause::build(filter);
        let sql = format!(
            "SELECT COUNT(*),
                    COALESCE(AVG(response_time_ms), 0),
                    COALESCE(SUM(input_tokens), 0),
                    COALESCE(SUM(output_tokens), 0),
                    COALESCE(SUM(output_tokens) * 1000.0 / NULLIF(SUM(response_time_ms), 0), 0),
                    COUNT(CASE WHEN status != 'success' THEN 1 END)
             FROM requests {}",
            clause.sql
        );
        let stats = conn.query_row(&sql, clause.params(), |row| {
            Ok(Stats {
                total_requests: row.get(0)?,
                avg_response_time: row.get(1)?,
                total_input_tokens: row.get(2)?,
                total_output_tokens: row.get(3)?,
                avg_throughput: row.get(4)?,
                error_count: row.get(5)?,
            })
        })?;
        Ok(stats)
    }

    fn time_series(&self, filter: &MetricsFilter, interval: Interval) -> Result<Vec<TimeBucket>> {
        let conn = self.conn.lock();
        let clause = WhereClause::build(filter);
        let sql = format!(
            "SELECT {} AS time_bucket, COUNT(*), AVG(response_time_ms), SUM(input_tokens), SUM(output_tokens)
             FROM requests {} GROUP BY time_bucket ORDER BY time_bucket",
            interval.bucket_sql(),
            clause.sql
        );
        let mut stmt = conn.prepare(&sql)?;
        let buckets = stmt
            .query_map(clause.params(), |row| {
                Ok(TimeBucket {
                    time_bucket: row.get(0)?,
                    request_count: row.get(1)?,
                    avg_response_time: row.get(2)?,
                    input_tokens: row.get(3)?,
                    output_tokens: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(buckets)
    }

    fn model_distribution(&self, filter: &MetricsFilter) -> Result<Vec<ModelShare>> {
        let conn = self.conn.lock();
        let clause = WhereClause::build(filter);
        let sql = format!(
            "SELECT model, COUNT(*) AS count, SUM(input_tokens + output_tokens)
             FROM requests {} GROUP BY model ORDER BY count DESC, model",
            clause.sql
        );
        let mut stmt = conn.prepare(&sql)?;
        let models = stmt
            .query_map(clause.params(), |row| {
                Ok(ModelShare {
                    model: row.get(0)?,
                    count: row.get(1)?,
                    total_tokens: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(models)
    }
}

/// 异步指标存储（公开 API）
///
/// 每次调用都在 blocking 线程池上执行，写入完成后才返回，
/// 调用方可以据此保证“先落库、再发送终止事件”的顺序
#[derive(Clone)]
pub struct MetricsStore {
    inner: Arc<SqliteMetrics>,
}

impl MetricsStore {
    /// 打开（必要时创建）数据库文件并初始化表结构
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(SqliteMetrics::open(db_path.as_ref())?),
        })
    }

    /// 追加一条记录
    pub async fn insert(&self, record: NewRequestRecord) -> Result<()> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.insert(&record)).await?
    }

    /// 按时间倒序查询记录
    pub async fn requests(&self, filter: MetricsFilter) -> Result<Vec<RequestRecord>> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.requests(&filter)).await?
    }

    /// 汇总统计
    pub async fn stats(&self, filter: MetricsFilter) -> Result<Stats> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.stats(&filter)).await?
    }

    /// 按小时或按天分桶的时间序列（升序）
    pub async fn time_series(
        &self,
        filter: MetricsFilter,
        interval: Interval,
    ) -> Result<Vec<TimeBucket>> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.time_series(&filter, interval)).await?
    }

    /// 按模型分布（请求数降序）
    pub async fn model_distribution(&self, filter: MetricsFilter) -> Result<Vec<ModelShare>> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.model_distribution(&filter)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::model::RequestStatus;

    fn record(id: &str, model: &str, status: RequestStatus, ts: &str) -> NewRequestRecord {
        NewRequestRecord {
            request_id: id.to_string(),
            model: model.to_string(),
            input_tokens: 10,
            output_tokens: 20,
            response_time_ms: 1000,
            streaming_duration_ms: Some(900),
            status,
            error_message: match status {
                RequestStatus::Success => None,
                RequestStatus::Error => Some("boom".to_string()),
            },
            timestamp: Some(ts.to_string()),
        }
    }

    async fn seeded_store(dir: &tempfile::TempDir) -> MetricsStore {
        let store = MetricsStore::open(dir.path().join("data").join("metrics.db")).unwrap();
        let rows = [
            record("r1", "llama3", RequestStatus::Success, "2025-03-01 09:10:00"),
            record("r2", "llama3", RequestStatus::Success, "2025-03-01 09:50:00"),
            record("r3", "gpt-oss", RequestStatus::Error, "2025-03-01 11:05:00"),
            record("r4", "llama3", RequestStatus::Success, "2025-03-02 08:00:00"),
        ];
        for row in rows {
            store.insert(row).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_requests_sorted_desc_and_limited() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;

        let all = store.requests(MetricsFilter::default()).await.unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.request_id.as_str()).collect();
        assert_eq!(ids, vec!["r4", "r3", "r2", "r1"]);
        assert_eq!(all[1].status, "error");
        assert_eq!(all[1].error_message.as_deref(), Some("boom"));
        assert_eq!(all[0].streaming_duration_ms, Some(900));

        let limited = store
            .requests(MetricsFilter {
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].request_id, "r4");
    }

    #[tokio::test]
    async fn test_filters_combine_with_and() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;

        let filter = MetricsFilter {
            start: Some("2025-03-01 09:30:00".to_string()),
            end: Some("2025-03-01 23:59:59".to_string()),
            model: Some("llama3".to_string()),
            ..Default::default()
        };
        let rows = store.requests(filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].request_id, "r2");

        let errors = store
            .requests(MetricsFilter {
                status: Some(RequestStatus::Error),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].request_id, "r3");
    }

    #[tokio::test]
    async fn test_stats_without_filters() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;

        let stats = store.stats(MetricsFilter::default()).await.unwrap();
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.total_input_tokens, 40);
        assert_eq!(stats.total_output_tokens, 80);
        assert!((stats.avg_response_time - 1000.0).abs() < f64::EPSILON);
        // 80 tokens / 4 秒
        assert!((stats.avg_throughput - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_stats_on_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetricsStore::open(dir.path().join("metrics.db")).unwrap();

        let stats = store.stats(MetricsFilter::default()).await.unwrap();
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.error_count, 0);
        assert_eq!(stats.avg_throughput, 0.0);
        assert!(store.time_series(MetricsFilter::default(), Interval::Hour).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hourly_series_is_ascending_and_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;

        let series = store
            .time_series(MetricsFilter::default(), Interval::Hour)
            .await
            .unwrap();
        let keys: Vec<_> = series.iter().map(|b| b.time_bucket.as_str()).collect();
        assert_eq!(
            keys,
            vec!["2025-03-01 09:00:00", "2025-03-01 11:00:00", "2025-03-02 08:00:00"]
        );
        assert_eq!(series[0].request_count, 2);
        assert_eq!(series[0].input_tokens, 20);
        assert_eq!(series[0].output_tokens, 40);

        let daily = store
            .time_series(MetricsFilter::default(), Interval::Day)
            .await
            .unwrap();
        let keys: Vec<_> = daily.iter().map(|b| b.time_bucket.as_str()).collect();
        assert_eq!(keys, vec!["2025-03-01", "2025-03-02"]);
        assert_eq!(daily[0].request_count, 3);
    }

    #[tokio::test]
    async fn test_model_distribution_desc_by_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir).await;

        let models = store
            .model_distribution(MetricsFilter::default())
            .await
            .unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].model, "llama3");
        assert_eq!(models[0].count, 3);
        assert_eq!(models[0].total_tokens, 90);
        assert_eq!(models[1].model, "gpt-oss");
    }

    #[tokio::test]
    async fn test_default_timestamp_and_unique_request_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetricsStore::open(dir.path().join("metrics.db")).unwrap();

        let mut rec = record("dup", "llama3", RequestStatus::Success, "");
        rec.timestamp = None;
        store.insert(rec.clone()).await.unwrap();
        assert!(store.insert(rec).await.is_err());

        let rows = store.requests(MetricsFilter::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        // CURRENT_TIMESTAMP 格式: YYYY-MM-DD HH:MM:SS
        assert_eq!(rows[0].timestamp.len(), 19);
    }
}
