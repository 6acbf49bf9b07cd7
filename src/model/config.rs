use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::codec::DEFAULT_MAX_LINE_BYTES;

/// 覆盖上游地址的环境变量
pub const OLLAMA_BASE_URL_ENV: &str = "OLLAMA_BASE_URL";

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Ollama 服务地址（不含 /api/chat 后缀）
    /// 环境变量 OLLAMA_BASE_URL 优先于此字段
    #[serde(default = "default_ollama_base_url")]
    pub ollama_base_url: String,

    /// 请求未指定 model 时使用的模型
    #[serde(default = "default_model")]
    pub default_model: String,

    /// 指标数据库文件路径
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// 上游建立连接的超时（秒）
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// 上游流式读取的空闲超时（秒），超过该时间没有收到任何字节即判定超时
    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,

    /// 连通性探测（/api/tags）超时（秒）
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// 客户端等待首个片段的看门狗时长（秒）
    #[serde(default = "default_client_stall_timeout_secs")]
    pub client_stall_timeout_secs: u64,

    /// 上游流中单行的字节上限
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,

    /// HTTP 代理地址（可选）
    /// 支持格式: http://host:port, https://host:port, socks5://host:port
    #[serde(default)]
    pub proxy_url: Option<String>,

    /// 配置文件路径（运行时元数据，不写入 JSON）
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "gpt-oss:120b-cloud".to_string()
}

fn default_db_path() -> String {
    "data/metrics.db".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_upstream_timeout_secs() -> u64 {
    300
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_client_stall_timeout_secs() -> u64 {
    30
}

fn default_max_line_bytes() -> usize {
    DEFAULT_MAX_LINE_BYTES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ollama_base_url: default_ollama_base_url(),
            default_model: default_model(),
            db_path: default_db_path(),
            connect_timeout_secs: default_connect_timeout_secs(),
            upstream_timeout_secs: default_upstream_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            client_stall_timeout_secs: default_client_stall_timeout_secs(),
            max_line_bytes: default_max_line_bytes(),
            proxy_url: None,
            config_path: None,
        }
    }
}

impl Config {
    /// 获取默认配置文件路径
    pub fn default_config_path() -> &'static str {
        "config.json"
    }

    /// 从文件加载配置
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            // 配置文件不存在，返回默认配置
            let mut config = Self::default();
            config.config_path = Some(path.to_path_buf());
            return Ok(config);
        }

        let content = fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&content)?;
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// 获取配置文件路径（如果有）
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// 应用环境变量覆盖（目前只有 OLLAMA_BASE_URL）
    pub fn apply_env_overrides(&mut self) {
        self.override_ollama_base_url(std::env::var(OLLAMA_BASE_URL_ENV).ok());
    }

    /// 用给定值覆盖上游地址，空值忽略
    pub fn override_ollama_base_url(&mut self, value: Option<String>) {
        if let Some(url) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
            self.ollama_base_url = url;
        }
    }

    /// 去掉末尾斜杠后的上游地址
    pub fn ollama_base_url(&self) -> &str {
        self.ollama_base_url.trim_end_matches('/')
    }

    /// 监听地址
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
