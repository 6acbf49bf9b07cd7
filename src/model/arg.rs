use clap::{Parser, Subcommand};

/// Ollama 流式对话中继服务
#[derive(Parser, Debug)]
#[command(name = "ollama-relay", version, about)]
pub struct Args {
    /// 配置文件路径
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 启动 HTTP 服务（默认）
    Serve,
    /// 通过正在运行的中继服务对话；不给 PROMPT 时进入交互模式
    Chat {
        /// 中继服务地址，默认取配置中的 host:port
        #[arg(short, long)]
        server: Option<String>,

        /// 模型名称，默认由服务端决定
        #[arg(short, long)]
        model: Option<String>,

        prompt: Option<String>,
    },
    /// 检查 Ollama 连通性并列出模型
    Probe,
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}
