//! 会话监听器回调接口

use crate::im::conversation::models::{Conversation, Message};
use async_trait::async_trait;

/// 会话监听器回调接口（由 UI 层实现）
#[async_trait]
pub trait ConversationListener: Send + Sync {
    /// 开始加载某个会话
    async fn on_sync_start(&self, conversation_id: &str);

    /// 会话加载完成并已写入本地存储
    async fn on_sync_finish(&self, conversation_id: &str);

    /// 会话加载失败，已降级为本地数据
    async fn on_sync_failed(&self, conversation_id: &str, error: &str);

    /// 会话变更（加载、乐观追加、确认或失败）
    async fn on_conversation_changed(&self, conversation: &Conversation);

    /// 消息发送失败，消息已保留为 failed 状态等待重发
    async fn on_send_failed(&self, conversation_id: &str, message: &Message, error: &str);

    /// 凭证缺失或失效，上层应跳转登录
    async fn on_unauthorized(&self);
}

/// 空实现（默认监听器）
pub struct EmptyConversationListener;

#[async_trait]
impl ConversationListener for EmptyConversationListener {
    async fn on_sync_start(&self, _conversation_id: &str) {}
    async fn on_sync_finish(&self, _conversation_id: &str) {}
    async fn on_sync_failed(&self, _conversation_id: &str, _error: &str) {}
    async fn on_conversation_changed(&self, _conversation: &Conversation) {}
    async fn on_send_failed(&self, _conversation_id: &str, _message: &Message, _error: &str) {}
    async fn on_unauthorized(&self) {}
}
