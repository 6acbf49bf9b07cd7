mod app;
mod chat;
mod client;
mod codec;
mod common;
mod http_client;
mod metrics;
mod model;
mod ollama;
mod system;

use std::io::{self, BufRead, Write};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use app::{AppState, create_app};
use client::RelayClient;
use metrics::{MetricsStore, MetricsTracker};
use model::arg::{Args, Command};
use model::config::Config;
use ollama::{ChatMessage, OllamaClient};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .init();

    let args = Args::parse();
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| Config::default_config_path().to_string());
    let mut config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("加载配置失败 {}: {:#}", config_path, e);
            std::process::exit(1);
        }
    };
    config.apply_env_overrides();
    if let Some(path) = config.config_path().filter(|p| p.exists()) {
        tracing::info!("已加载配置文件: {}", path.display());
    }

    let result = match args.command() {
        Command::Serve => serve(config).await,
        Command::Chat {
            server,
            model,
            prompt,
        } => chat(&config, server, model, prompt).await,
        Command::Probe => probe(&config).await,
    };

    if let Err(e) = result {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let store = MetricsStore::open(&config.db_path)
        .with_context(|| format!("打开指标数据库失败: {}", config.db_path))?;
    tracing::info!("指标数据库: {}", config.db_path);

    let ollama = OllamaClient::from_config(&config)?;
    if ollama.check_connection().await {
        tracing::info!("Ollama 已连接: {}", ollama.base_url());
    } else {
        tracing::warn!("Ollama 暂不可达: {}", ollama.base_url());
    }

    let state = AppState::new(ollama, MetricsTracker::new(store), config.default_model.clone());
    let app = create_app(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("监听 {} 失败", addr))?;
    tracing::info!("启动 HTTP 服务器: {}", addr);
    tracing::info!("默认模型: {}", config.default_model);
    tracing::info!("可用 API:");
    tracing::info!("  POST /api/chat");
    tracing::info!("  GET  /api/metrics");
    tracing::info!("  GET  /api/system");
    tracing::info!("  GET  /api/test-ollama");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("服务已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("监听退出信号失败: {}", e);
    }
}

/// 命令行对话：给出 prompt 时只问一次，否则逐行读取 stdin 并保留上下文
async fn chat(
    config: &Config,
    server: Option<String>,
    model: Option<String>,
    prompt: Option<String>,
) -> anyhow::Result<()> {
    let base_url = server.unwrap_or_else(|| format!("http://{}", config.bind_addr()));
    let client = RelayClient::new(
        http_client::build_client(None, config.connect_timeout_secs)?,
        base_url,
        Duration::from_secs(config.client_stall_timeout_secs),
    );

    if let Some(prompt) = prompt {
        ask(&client, &[ChatMessage::user(prompt)], model.as_deref()).await?;
        return Ok(());
    }

    let mut history: Vec<ChatMessage> = Vec::new();
    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/exit" || line == "/quit" {
            break;
        }

        history.push(ChatMessage::user(line));
        match ask(&client, &history, model.as_deref()).await {
            Ok(reply) => history.push(ChatMessage::assistant(reply)),
            Err(e) => {
                // 失败的提问不进入上下文
                history.pop();
                eprintln!("Error: {:#}", e);
            }
        }
    }
    Ok(())
}

/// 发送一轮对话并把增量内容实时打印到 stdout，返回完整回复
async fn ask(
    client: &RelayClient,
    messages: &[ChatMessage],
    model: Option<&str>,
) -> anyhow::Result<String> {
    let mut printed = 0usize;
    let reply = client
        .chat(messages, model, |text| {
            print!("{}", &text[printed..]);
            let _ = io::stdout().flush();
            printed = text.len();
        })
        .await?;
    println!();
    eprintln!(
        "[{} chunks, {:.1}s, ~{:.1} tokens/s]",
        reply.chunk_count,
        reply.elapsed.as_secs_f64(),
        reply.tokens_per_second
    );
    Ok(reply.content)
}

async fn probe(config: &Config) -> anyhow::Result<()> {
    let ollama = OllamaClient::from_config(config)?;
    if !ollama.check_connection().await {
        anyhow::bail!(
            "Ollama is not connected. Please make sure Ollama is running on {}",
            ollama.base_url()
        );
    }
    let models = ollama.list_models().await.context("获取模型列表失败")?;
    println!("Ollama is connected: {}", ollama.base_url());
    if models.is_empty() {
        println!("No models installed.");
    }
    for name in models {
        println!("  {}", name);
    }
    Ok(())
}
