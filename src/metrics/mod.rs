//! 请求指标模块
//!
//! Token 估算、进行中请求追踪、SQLite 持久化与查询接口

pub mod model;
pub mod store;
pub mod tokens;
pub mod tracker;
pub mod types;
mod handlers;
mod router;

pub use router::create_metrics_router;
pub use store::MetricsStore;
pub use tracker::{Completion, MetricsTracker};
