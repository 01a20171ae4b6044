//! 会话本地模型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 消息状态：pending → confirmed | failed；本地会话中的消息为 local_only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageStatus {
    /// 已乐观追加，等待服务器确认
    Pending,
    /// 已被服务器确认（ID 与时间戳来自服务器）
    Confirmed,
    /// 发送失败，保留在列表中等待重发
    Failed,
    /// 本地会话中的消息，从不发往服务器
    LocalOnly,
}

/// 单条消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub text: String,
    pub ts: DateTime<Utc>,
    pub from_me: bool,
    pub status: MessageStatus,
}

impl Message {
    /// 乐观发送时构造的待确认消息
    pub fn pending(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            ts: Utc::now(),
            from_me: true,
            status: MessageStatus::Pending,
        }
    }

    /// 是否仍可能只存在于本地（尚未被服务器接受）
    pub fn is_unconfirmed(&self) -> bool {
        matches!(self.status, MessageStatus::Pending | MessageStatus::Failed)
    }
}

/// 会话数据体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationBody {
    pub id: String,
    pub name: String,
    pub avatar_color: String,
    #[serde(default)]
    pub is_group: bool,
    /// 按插入顺序（即时间顺序）排列，只在尾部追加
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_time: Option<DateTime<Utc>>,
}

impl ConversationBody {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        avatar_color: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            avatar_color: avatar_color.into(),
            is_group: false,
            messages: Vec::new(),
            last_message: None,
            last_time: None,
        }
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self.refresh_summary();
        self
    }

    /// 根据尾部消息重新计算 lastMessage / lastTime 摘要
    pub fn refresh_summary(&mut self) {
        match self.messages.last() {
            Some(last) => {
                self.last_message = Some(last.text.clone());
                self.last_time = Some(last.ts);
            }
            None => {
                self.last_message = None;
                self.last_time = None;
            }
        }
    }
}

/// 会话：本地样例会话与服务器会话用显式变体区分
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "camelCase")]
pub enum Conversation {
    /// 本地模式生成的会话，不会访问远端
    Local(ConversationBody),
    /// 对应服务器上的会话
    Remote(ConversationBody),
}

impl Conversation {
    pub fn body(&self) -> &ConversationBody {
        match self {
            Conversation::Local(body) | Conversation::Remote(body) => body,
        }
    }

    pub fn body_mut(&mut self) -> &mut ConversationBody {
        match self {
            Conversation::Local(body) | Conversation::Remote(body) => body,
        }
    }

    pub fn into_body(self) -> ConversationBody {
        match self {
            Conversation::Local(body) | Conversation::Remote(body) => body,
        }
    }

    pub fn id(&self) -> &str {
        &self.body().id
    }

    pub fn name(&self) -> &str {
        &self.body().name
    }

    pub fn messages(&self) -> &[Message] {
        &self.body().messages
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Conversation::Local(_))
    }
}

/// 会话成员
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: String,
    pub name: Option<String>,
}

/// 会话元信息（用于解析显示名称）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationMeta {
    pub name: Option<String>,
    pub is_group: bool,
    pub members: Vec<Member>,
}

impl ConversationMeta {
    /// 解析会话显示名：优先使用会话名称，其次为双人会话中的对方名称
    pub fn display_name(&self, current_user_id: &str) -> Option<String> {
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            return Some(name.to_string());
        }
        if self.members.len() == 2 {
            return self
                .members
                .iter()
                .find(|m| m.id != current_user_id)
                .and_then(|m| m.name.clone());
        }
        None
    }
}

/// 用户目录中的用户
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    pub id: String,
    pub name: String,
    pub last_seen: Option<DateTime<Utc>>,
    pub online: bool,
    pub contact: String,
}

/// 会话同步器配置
#[derive(Debug, Clone, Copy)]
pub struct ConversationSyncerConfig {
    /// 选中会话时是否同时拉取会话元信息
    pub fetch_meta: bool,
}

impl Default for ConversationSyncerConfig {
    fn default() -> Self {
        Self { fetch_meta: true }
    }
}
