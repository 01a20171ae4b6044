//! 本地会话存储
//!
//! 渲染层唯一的数据来源。所有修改都经过内部互斥锁串行执行，
//! 配置了 DAO 时每次修改后立即写入 SQLite。

use crate::im::conversation::dao::ConversationDao;
use crate::im::conversation::models::{Conversation, Message, MessageStatus};
use crate::im::serialization::{parse_provisional_seq, provisional_msg_id};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct ConversationStore {
    conversations: Mutex<Vec<Conversation>>,
    dao: Option<ConversationDao>,
    /// 已分配的最大临时消息序号，由共享同一存储的所有同步器共用
    pending_seq: AtomicU64,
}

impl ConversationStore {
    /// 纯内存存储
    pub fn in_memory() -> Self {
        Self {
            conversations: Mutex::new(Vec::new()),
            dao: None,
            pending_seq: AtomicU64::new(0),
        }
    }

    /// 打开存储并从持久化数据恢复；数据缺失或损坏时退化为空存储
    pub async fn open(dao: Option<ConversationDao>) -> Self {
        let conversations = match &dao {
            Some(dao) => match dao.load_all().await {
                Ok(list) => {
                    info!("[ConvStore] 从本地恢复 {} 个会话", list.len());
                    list
                }
                Err(e) => {
                    warn!("[ConvStore] 本地会话数据不可用，使用空存储: {:#}", e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        let pending_seq = AtomicU64::new(max_provisional_seq(&conversations));
        Self {
            conversations: Mutex::new(conversations),
            dao,
            pending_seq,
        }
    }

    pub async fn get_all(&self) -> Vec<Conversation> {
        self.conversations.lock().await.clone()
    }

    pub async fn get_by_id(&self, id: &str) -> Option<Conversation> {
        self.conversations
            .lock()
            .await
            .iter()
            .find(|c| c.id() == id)
            .cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.conversations.lock().await.iter().any(|c| c.id() == id)
    }

    /// 替换同 ID 会话或追加到末尾，不会隐式合并消息列表
    pub async fn upsert(&self, mut conversation: Conversation) {
        conversation.body_mut().refresh_summary();
        let mut list = self.conversations.lock().await;
        let position = match list.iter().position(|c| c.id() == conversation.id()) {
            Some(idx) => {
                list[idx] = conversation;
                idx
            }
            None => {
                list.push(conversation);
                list.len() - 1
            }
        };
        self.persist(position, &list[position]).await;
    }

    /// 在同一次加锁内读取旧值并写入新值，避免与其他修改交错
    pub async fn upsert_with<F>(&self, id: &str, build: F) -> Conversation
    where
        F: FnOnce(Option<Conversation>) -> Conversation,
    {
        let mut list = self.conversations.lock().await;
        let idx = list.iter().position(|c| c.id() == id);
        let mut conversation = build(idx.map(|i| list[i].clone()));
        conversation.body_mut().refresh_summary();
        let position = match idx {
            Some(i) => {
                list[i] = conversation;
                i
            }
            None => {
                list.push(conversation);
                list.len() - 1
            }
        };
        self.persist(position, &list[position]).await;
        list[position].clone()
    }

    /// 向会话尾部追加消息；会话不存在时静默忽略
    pub async fn append_message(&self, conversation_id: &str, message: Message) {
        let mut list = self.conversations.lock().await;
        let Some(position) = list.iter().position(|c| c.id() == conversation_id) else {
            debug!(
                "[ConvStore] 追加消息时会话不存在，忽略: conversationID={}",
                conversation_id
            );
            return;
        };
        let body = list[position].body_mut();
        body.messages.push(message);
        body.refresh_summary();
        self.persist(position, &list[position]).await;
    }

    /// 以新的临时 ID 追加一条 pending 消息；会话不存在时返回 None
    ///
    /// 临时 ID 在存储内（包括重启后恢复的数据）不会与现存消息重复。
    pub async fn append_pending(&self, conversation_id: &str, text: &str) -> Option<Message> {
        let mut list = self.conversations.lock().await;
        let position = list.iter().position(|c| c.id() == conversation_id)?;
        // 序号只在持有会话锁时分配
        let seq = self
            .pending_seq
            .load(Ordering::SeqCst)
            .max(max_provisional_seq(&list))
            + 1;
        self.pending_seq.store(seq, Ordering::SeqCst);

        let message = Message::pending(provisional_msg_id(seq), text);
        let body = list[position].body_mut();
        body.messages.push(message.clone());
        body.refresh_summary();
        self.persist(position, &list[position]).await;
        Some(message)
    }

    /// 用服务器确认的消息替换临时消息；找不到 old_id 时追加，保证确认结果不丢失
    pub async fn replace_message(&self, conversation_id: &str, old_id: &str, new_message: Message) {
        let mut list = self.conversations.lock().await;
        let Some(position) = list.iter().position(|c| c.id() == conversation_id) else {
            debug!(
                "[ConvStore] 替换消息时会话不存在，忽略: conversationID={}",
                conversation_id
            );
            return;
        };
        let body = list[position].body_mut();
        match body.messages.iter().position(|m| m.id == old_id) {
            Some(idx) => body.messages[idx] = new_message,
            None => {
                debug!(
                    "[ConvStore] 未找到待替换消息 {}，改为追加: {}",
                    old_id, new_message.id
                );
                body.messages.push(new_message);
            }
        }
        body.refresh_summary();
        self.persist(position, &list[position]).await;
    }

    /// 修改单条消息状态，返回修改后的消息
    pub async fn set_message_status(
        &self,
        conversation_id: &str,
        message_id: &str,
        status: MessageStatus,
    ) -> Option<Message> {
        let mut list = self.conversations.lock().await;
        let position = list.iter().position(|c| c.id() == conversation_id)?;
        let message = list[position]
            .body_mut()
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)?;
        message.status = status;
        let updated = message.clone();
        self.persist(position, &list[position]).await;
        Some(updated)
    }

    /// 按名称或最新消息过滤（忽略大小写），空查询返回全部
    pub async fn filter(&self, query: &str) -> Vec<Conversation> {
        let q = query.trim().to_lowercase();
        let list = self.conversations.lock().await;
        if q.is_empty() {
            return list.clone();
        }
        list.iter()
            .filter(|c| {
                let body = c.body();
                body.name.to_lowercase().contains(&q)
                    || body
                        .last_message
                        .as_deref()
                        .is_some_and(|m| m.to_lowercase().contains(&q))
            })
            .cloned()
            .collect()
    }

    /// 按最近消息时间倒序，没有消息的会话排在最后
    pub async fn sorted_by_recency(&self) -> Vec<Conversation> {
        let mut list = self.get_all().await;
        list.sort_by(|a, b| b.body().last_time.cmp(&a.body().last_time));
        list
    }

    /// 清空全部会话（退出登录）
    pub async fn clear(&self) {
        let mut list = self.conversations.lock().await;
        list.clear();
        if let Some(dao) = &self.dao {
            if let Err(e) = dao.delete_all().await {
                warn!("[ConvStore] 清空本地会话失败: {:#}", e);
            }
        }
    }

    async fn persist(&self, position: usize, conversation: &Conversation) {
        let Some(dao) = &self.dao else {
            return;
        };
        if let Err(e) = dao.upsert_conversation(position, conversation).await {
            warn!(
                "[ConvStore] 持久化会话失败: conversationID={}, 错误: {:#}",
                conversation.id(),
                e
            );
        }
    }
}

fn max_provisional_seq(conversations: &[Conversation]) -> u64 {
    conversations
        .iter()
        .flat_map(|c| c.messages())
        .filter_map(|m| parse_provisional_seq(&m.id))
        .max()
        .unwrap_or(0)
}
