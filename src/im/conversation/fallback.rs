//! 远端 / 本地模式降级策略
//!
//! 启动时探测后端是否可用决定整体模式；本地样例会话的 ID 一旦登记，
//! 在本次运行期间都不会再访问远端。其余会话在每次选中时单独判断。

use crate::im::conversation::api::ConversationGateway;
use crate::im::conversation::models::{
    Conversation, ConversationBody, Message, MessageStatus,
};
use crate::im::conversation::store::ConversationStore;
use crate::im::error::SyncError;
use crate::im::serialization::avatar_color_for;
use crate::im::session::Session;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// 后端可达且持有凭证
    Remote,
    /// 后端不可达或未登录，使用本地样例数据
    LocalOnly,
}

/// 读路径失败后的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadDecision {
    RedirectToLogin,
    Degrade,
}

/// 发送失败后的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDecision {
    /// 保留消息并标记为 failed，等待用户重发
    MarkFailed,
    /// 本地会话中的消息，保持为 local_only
    KeepLocal,
}

/// 本地样例会话：(ID, 名称, [(内容, 是否自己发送, 分钟偏移)])
const SAMPLE_CONVERSATIONS: &[(&str, &str, &[(&str, bool, i64)])] = &[
    (
        "sample-1",
        "Sam",
        &[
            ("Hey! Are we still on for tonight?", false, 0),
            ("Yes, 7pm works for me.", true, 2),
            ("Great, see you there.", false, 3),
        ],
    ),
    (
        "sample-2",
        "Ava",
        &[
            ("Did you get a chance to review the notes?", false, 0),
            ("Not yet, will do this afternoon.", true, 15),
        ],
    ),
    (
        "sample-3",
        "Leo",
        &[("Call me when you're free.", false, 0)],
    ),
];

fn sample_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// 生成确定性的本地样例会话
pub fn sample_conversations() -> Vec<Conversation> {
    let epoch = sample_epoch();
    SAMPLE_CONVERSATIONS
        .iter()
        .enumerate()
        .map(|(conv_idx, (id, name, messages))| {
            let base = epoch + chrono::Duration::hours(conv_idx as i64);
            let messages = messages
                .iter()
                .enumerate()
                .map(|(msg_idx, (text, from_me, offset))| Message {
                    id: format!("{}-m{}", id, msg_idx + 1),
                    text: text.to_string(),
                    ts: base + chrono::Duration::minutes(*offset),
                    from_me: *from_me,
                    status: MessageStatus::LocalOnly,
                })
                .collect();
            Conversation::Local(
                ConversationBody::new(*id, *name, avatar_color_for(id)).with_messages(messages),
            )
        })
        .collect()
}

#[derive(Default)]
pub struct FallbackPolicy {
    local_ids: Mutex<HashSet<String>>,
}

impl FallbackPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// 启动探测：无凭证或目录接口失败都进入本地模式
    pub async fn probe(session: &Session, gateway: &dyn ConversationGateway) -> SessionMode {
        if !session.is_authenticated() {
            info!("[Fallback] 未登录，进入本地模式");
            return SessionMode::LocalOnly;
        }
        match gateway.fetch_users("").await {
            Ok(users) => {
                info!("[Fallback] 后端可用（目录用户数: {}），进入远端模式", users.len());
                SessionMode::Remote
            }
            Err(e) => {
                warn!("[Fallback] 后端探测失败，进入本地模式: {}", e);
                SessionMode::LocalOnly
            }
        }
    }

    /// 写入样例会话并登记为本地会话，已存在的同 ID 会话不会被覆盖
    pub async fn seed_samples(&self, store: &ConversationStore) -> usize {
        let mut seeded = 0;
        for conv in sample_conversations() {
            self.mark_local(conv.id());
            if store.contains(conv.id()).await {
                continue;
            }
            store.upsert(conv).await;
            seeded += 1;
        }
        info!("[Fallback] 写入本地样例会话 {} 个", seeded);
        seeded
    }

    pub fn mark_local(&self, conversation_id: &str) {
        self.lock().insert(conversation_id.to_string());
    }

    pub fn is_local(&self, conversation_id: &str) -> bool {
        self.lock().contains(conversation_id)
    }

    /// 是否需要访问远端：登记过的本地 ID 与本地变体会话都不访问
    pub fn should_fetch_remote(
        &self,
        conversation_id: &str,
        existing: Option<&Conversation>,
    ) -> bool {
        if self.is_local(conversation_id) {
            return false;
        }
        match existing {
            Some(Conversation::Local(_)) => {
                self.mark_local(conversation_id);
                false
            }
            _ => true,
        }
    }

    pub fn decide_read(&self, error: &SyncError) -> ReadDecision {
        if error.is_unauthorized() {
            return ReadDecision::RedirectToLogin;
        }
        if !error.is_degradable() {
            warn!("[Fallback] 读路径出现非预期错误，按降级处理: {}", error);
        }
        ReadDecision::Degrade
    }

    pub fn decide_send(&self, conversation: &Conversation, _error: &SyncError) -> SendDecision {
        match conversation {
            Conversation::Local(_) => SendDecision::KeepLocal,
            Conversation::Remote(_) => SendDecision::MarkFailed,
        }
    }

    /// 降级时用于渲染的会话：已有数据原样保留，否则生成空壳
    pub fn degrade_shell(
        &self,
        existing: Option<Conversation>,
        conversation_id: &str,
        fallback_name: &str,
    ) -> Conversation {
        existing.unwrap_or_else(|| {
            Conversation::Remote(ConversationBody::new(
                conversation_id,
                fallback_name,
                avatar_color_for(conversation_id),
            ))
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.local_ids.lock().unwrap_or_else(|e| e.into_inner())
    }
}
