//! Messenger CLI 客户端（测试版）
//!
//! 非交互式 CLI，用于手动验证会话同步
//! 启动时可选登录，随后列出会话、打开指定会话并发送一条消息

use anyhow::Result;
use clap::Parser;
use messenger_sdk_core_rust::im::client::{ClientConfig, MessengerClient};
use messenger_sdk_core_rust::im::conversation::listener::ConversationListener;
use messenger_sdk_core_rust::im::conversation::models::{Conversation, Message, MessageStatus};
use messenger_sdk_core_rust::im::conversation::service::{LoadOutcome, SendOutcome};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Messenger CLI 客户端
#[derive(Parser, Debug)]
#[command(name = "messenger-cli")]
#[command(about = "Messenger CLI 客户端 - 用于测试会话同步", long_about = None)]
struct Args {
    /// 登录用的联系方式（7-15 位数字），不填则沿用本地凭证
    #[arg(short, long)]
    contact: Option<String>,

    /// 登录密码
    #[arg(short, long)]
    password: Option<String>,

    /// 要打开的会话 ID
    #[arg(long)]
    chat: Option<String>,

    /// 打开会话后发送的消息内容
    #[arg(long)]
    send: Option<String>,

    /// 本地数据库文件路径（默认: messenger.db）
    #[arg(long, default_value = "messenger.db")]
    db: String,

    /// 强制本地模式，不访问后端
    #[arg(long)]
    offline: bool,

    /// 日志级别（默认: info,messenger_sdk_core_rust=debug）
    #[arg(long, default_value = "info,messenger_sdk_core_rust=debug")]
    log_level: String,
}

/// 初始化日志（输出到 stdout，能创建日志文件时同时写入 debug.log）
fn init_logger(log_level: &str) {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_target(false)
        .with_ansi(true);

    let log_file = OpenOptions::new().create(true).append(true).open("debug.log");
    let file_layer = log_file.as_ref().ok().and_then(|f| f.try_clone().ok()).map(|f| {
        tracing_subscriber::fmt::layer()
            .with_writer(f)
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    if let Err(e) = log_file {
        warn!("[CLI] 无法创建日志文件 debug.log，仅输出到控制台: {}", e);
    }
}

/// 会话事件直接打印到日志
struct CliConversationListener;

#[async_trait::async_trait]
impl ConversationListener for CliConversationListener {
    async fn on_sync_start(&self, conversation_id: &str) {
        info!("[CLI/Conversation] 🔄 开始同步: {}", conversation_id);
    }

    async fn on_sync_finish(&self, conversation_id: &str) {
        info!("[CLI/Conversation] ✅ 同步完成: {}", conversation_id);
    }

    async fn on_sync_failed(&self, conversation_id: &str, error: &str) {
        warn!("[CLI/Conversation] ⚠️ 同步失败: {} ({})", conversation_id, error);
    }

    async fn on_conversation_changed(&self, conversation: &Conversation) {
        info!(
            "[CLI/Conversation] 📝 会话变更: {} | 消息数: {}",
            conversation.name(),
            conversation.messages().len()
        );
    }

    async fn on_send_failed(&self, conversation_id: &str, message: &Message, error: &str) {
        error!(
            "[CLI/Conversation] ❌ 发送失败: {} | {} ({})",
            conversation_id, message.text, error
        );
    }

    async fn on_unauthorized(&self) {
        error!("[CLI/Conversation] 🔒 凭证失效，请使用 --contact/--password 重新登录");
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > 30 {
        format!("{}…", text.chars().take(30).collect::<String>())
    } else {
        text.to_string()
    }
}

fn print_conversation(conversation: &Conversation) {
    info!(
        "[CLI] 💬 {} ({})",
        conversation.name(),
        if conversation.is_local() { "本地" } else { "远端" }
    );
    for msg in conversation.messages() {
        let marker = match msg.status {
            MessageStatus::Pending => " ⏳",
            MessageStatus::Failed => " ❗",
            MessageStatus::Confirmed | MessageStatus::LocalOnly => "",
        };
        info!(
            "[CLI]   {} {} {}{}",
            msg.ts.format("%H:%M"),
            if msg.from_me { "我:" } else { "对方:" },
            msg.text,
            marker
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logger(&args.log_level);
    info!("[CLI] 🚀 Messenger CLI 客户端（测试模式）");

    let config = ClientConfig {
        db_url: Some(format!("sqlite://{}?mode=rwc", args.db)),
        offline: args.offline,
        ..ClientConfig::new()
    };
    let mut client = MessengerClient::connect(config).await?;
    client.set_conversation_listener(Arc::new(CliConversationListener));

    if let (Some(contact), Some(password)) = (&args.contact, &args.password) {
        if args.offline {
            warn!("[CLI] 离线模式下忽略登录参数");
        } else {
            let session = client
                .login(contact, password)
                .await
                .map_err(|e| anyhow::anyhow!("登录失败: {}", e))?;
            info!("[CLI] ✅ 登录成功！用户: {}", session.user_name);
        }
    }
    info!("[CLI] 🌐 当前模式: {:?}", client.mode());

    let conversations = client.store().sorted_by_recency().await;
    info!("[CLI] 📋 会话列表（共 {} 个）:", conversations.len());
    for conv in &conversations {
        info!(
            "[CLI]   - {} | {} | 最新: {}",
            conv.id(),
            conv.name(),
            preview(conv.body().last_message.as_deref().unwrap_or(""))
        );
    }

    let Some(chat_id) = args.chat.as_deref() else {
        if args.send.is_some() {
            warn!("[CLI] 未指定 --chat，忽略 --send");
        }
        return Ok(());
    };

    let syncer = client.syncer().clone();
    match syncer.select(chat_id).await {
        Ok(LoadOutcome::Degraded(e)) => warn!("[CLI] ⚠️ 后端不可用，显示本地数据: {}", e),
        Ok(outcome) => info!("[CLI] 📂 打开会话: {:?}", outcome),
        Err(e) => return Err(anyhow::anyhow!("打开会话失败: {}", e)),
    }

    if let Some(text) = args.send.as_deref() {
        match syncer.send(text).await {
            Ok(SendOutcome::Confirmed(msg)) => info!("[CLI] ✅ 已发送: {}", msg.id),
            Ok(SendOutcome::LocalOnly(msg)) => info!("[CLI] 📴 已保存到本地会话: {}", msg.id),
            Ok(SendOutcome::Failed { message, error }) => warn!(
                "[CLI] ❌ 发送失败，消息已保留（可重发）: {} ({})",
                message.id, error
            ),
            Err(e) => error!("[CLI] 无法发送: {}", e),
        }
    }

    if let Some(conv) = syncer.active_conversation().await {
        print_conversation(&conv);
    }
    info!("[CLI] 👋 程序退出");
    Ok(())
}
