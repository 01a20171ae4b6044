//! 会话同步服务层
//!
//! 选中会话时拉取远端消息并合并到本地存储；发送消息时先乐观追加，
//! 再调用远端接口确认或标记失败。

use crate::im::conversation::api::ConversationGateway;
use crate::im::conversation::fallback::{FallbackPolicy, ReadDecision, SendDecision};
use crate::im::conversation::listener::{ConversationListener, EmptyConversationListener};
use crate::im::conversation::models::{
    Conversation, ConversationBody, ConversationMeta, ConversationSyncerConfig, DirectoryUser,
    Message, MessageStatus,
};
use crate::im::conversation::selection::{ActiveSelection, SelectionTicket};
use crate::im::conversation::store::ConversationStore;
use crate::im::error::{SyncError, SyncResult};
use crate::im::serialization::avatar_color_for;
use crate::im::session::Session;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 一次选中会话的加载结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// 远端数据已合并到本地存储
    Loaded,
    /// 本地会话，未访问远端
    LocalOnly,
    /// 远端不可用，已降级为本地空壳或保留已有数据
    Degraded(SyncError),
    /// 加载期间选中目标已改变，结果被丢弃
    Stale,
}

/// 一次发送的结果（校验失败通过 Err 返回）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Confirmed(Message),
    LocalOnly(Message),
    /// 发送失败，消息以 failed 状态保留在列表中，可通过 resend 重发
    Failed { message: Message, error: SyncError },
}

/// 会话同步器
pub struct ConversationSyncer {
    config: ConversationSyncerConfig,
    session: Session,
    gateway: Arc<dyn ConversationGateway>,
    store: Arc<ConversationStore>,
    selection: ActiveSelection,
    policy: Arc<FallbackPolicy>,
    listener: Arc<dyn ConversationListener>,
    background_load: Mutex<Option<JoinHandle<SyncResult<LoadOutcome>>>>,
}

impl ConversationSyncer {
    /// 创建新的会话同步器（使用默认空监听器）
    pub fn new(
        session: Session,
        gateway: Arc<dyn ConversationGateway>,
        store: Arc<ConversationStore>,
        policy: Arc<FallbackPolicy>,
    ) -> Self {
        Self::with_listener(
            session,
            gateway,
            store,
            policy,
            Arc::new(EmptyConversationListener),
        )
    }

    /// 创建新的会话同步器（带自定义监听器）
    pub fn with_listener(
        session: Session,
        gateway: Arc<dyn ConversationGateway>,
        store: Arc<ConversationStore>,
        policy: Arc<FallbackPolicy>,
        listener: Arc<dyn ConversationListener>,
    ) -> Self {
        info!(
            "[ConvSync] 创建会话同步器，用户ID: {}, 已登录: {}",
            session.current_user_id,
            session.is_authenticated()
        );
        Self {
            config: ConversationSyncerConfig::default(),
            session,
            gateway,
            store,
            selection: ActiveSelection::new(),
            policy,
            listener,
            background_load: Mutex::new(None),
        }
    }

    pub fn with_config(mut self, config: ConversationSyncerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn policy(&self) -> &Arc<FallbackPolicy> {
        &self.policy
    }

    pub fn active_id(&self) -> Option<String> {
        self.selection.active_id()
    }

    /// 当前选中的会话
    pub async fn active_conversation(&self) -> Option<Conversation> {
        let id = self.selection.active_id()?;
        self.store.get_by_id(&id).await
    }

    pub fn clear_selection(&self) {
        self.selection.clear();
    }

    /// 选中会话并拉取远端消息合并到本地
    pub async fn select(&self, conversation_id: &str) -> SyncResult<LoadOutcome> {
        let ticket = self.selection.select(conversation_id);
        let existing = self.store.get_by_id(conversation_id).await;

        if !self
            .policy
            .should_fetch_remote(conversation_id, existing.as_ref())
        {
            debug!(
                "[ConvSync] 本地会话，跳过远端拉取: conversationID={}",
                conversation_id
            );
            if existing.is_none() {
                let shell = Conversation::Local(ConversationBody::new(
                    conversation_id,
                    conversation_id,
                    avatar_color_for(conversation_id),
                ));
                self.store.upsert(shell).await;
            }
            return Ok(LoadOutcome::LocalOnly);
        }

        info!("[ConvSync] 🔄 加载会话: conversationID={}", conversation_id);
        self.listener.on_sync_start(conversation_id).await;

        let meta_fut = async {
            if self.config.fetch_meta {
                Some(self.gateway.fetch_conversation_meta(conversation_id).await)
            } else {
                None
            }
        };
        let (messages, meta) =
            tokio::join!(self.gateway.fetch_messages(conversation_id), meta_fut);

        if !self.selection.is_current(&ticket) {
            info!(
                "[ConvSync] ⏭️ 选中目标已改变，丢弃过期结果: conversationID={}",
                conversation_id
            );
            return Ok(LoadOutcome::Stale);
        }

        if let Some(Err(SyncError::Unauthorized)) = &meta {
            warn!("[ConvSync] 会话元信息请求未授权: conversationID={}", conversation_id);
            return self.handle_read_failure(&ticket, SyncError::Unauthorized).await;
        }

        match messages {
            Ok(messages) => {
                let meta = match meta {
                    Some(Ok(meta)) => Some(meta),
                    Some(Err(e)) => {
                        debug!("[ConvSync] 会话元信息不可用，沿用已有名称: {}", e);
                        None
                    }
                    None => None,
                };
                // 合并时读取最新数据：加载期间可能有乐观发送的消息写入
                let merged = self
                    .store
                    .upsert_with(conversation_id, |latest| {
                        self.merge(conversation_id, latest, messages, meta.as_ref())
                    })
                    .await;
                info!(
                    "[ConvSync] ✅ 会话加载完成: conversationID={}, 消息数: {}",
                    conversation_id,
                    merged.messages().len()
                );
                self.listener.on_sync_finish(conversation_id).await;
                self.listener.on_conversation_changed(&merged).await;
                Ok(LoadOutcome::Loaded)
            }
            Err(e) => self.handle_read_failure(&ticket, e).await,
        }
    }

    /// 在后台任务中加载会话，并取消上一次尚未完成的后台加载
    pub fn spawn_select(self: &Arc<Self>, conversation_id: &str) -> tokio::task::AbortHandle {
        let this = Arc::clone(self);
        let id = conversation_id.to_string();
        let handle = tokio::spawn(async move { this.select(&id).await });
        let abort = handle.abort_handle();

        let mut slot = self
            .background_load
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(handle) {
            if !previous.is_finished() {
                debug!("[ConvSync] 取消上一次未完成的会话加载");
                previous.abort();
            }
        }
        abort
    }

    /// 取消尚未完成的后台加载并清除选中状态，之后不会再有加载结果写入存储
    pub fn cancel_background_load(&self) {
        self.selection.clear();
        let previous = self
            .background_load
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = previous {
            if !handle.is_finished() {
                debug!("[ConvSync] 取消后台会话加载");
                handle.abort();
            }
        }
    }

    /// 等待最近一次后台加载完成
    pub async fn join_background_load(&self) -> Option<SyncResult<LoadOutcome>> {
        let handle = self
            .background_load
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()?;
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                debug!("[ConvSync] 后台加载未完成: {}", e);
                None
            }
        }
    }

    /// 与目录中的用户开启会话并选中
    pub async fn open_conversation_with(
        &self,
        user: &DirectoryUser,
    ) -> SyncResult<(String, LoadOutcome)> {
        let conversation_id = match self.gateway.create_chat(&user.id).await {
            Ok(id) => id,
            Err(e) => {
                if e.is_unauthorized() {
                    self.listener.on_unauthorized().await;
                }
                return Err(e);
            }
        };
        if !self.store.contains(&conversation_id).await {
            let shell = Conversation::Remote(ConversationBody::new(
                conversation_id.as_str(),
                user.name.as_str(),
                avatar_color_for(&conversation_id),
            ));
            self.store.upsert(shell).await;
        }
        let outcome = self.select(&conversation_id).await?;
        Ok((conversation_id, outcome))
    }

    /// 查询用户目录
    pub async fn search_users(&self, query: &str) -> SyncResult<Vec<DirectoryUser>> {
        let result = self.gateway.fetch_users(query).await;
        if let Err(SyncError::Unauthorized) = &result {
            self.listener.on_unauthorized().await;
        }
        result
    }

    /// 向当前选中的会话发送消息
    pub async fn send(&self, text: &str) -> SyncResult<SendOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::Validation("消息内容不能为空".to_string()));
        }
        let Some(conversation_id) = self.selection.active_id() else {
            return Err(SyncError::Validation("没有选中的会话".to_string()));
        };

        let conversation = match self.store.get_by_id(&conversation_id).await {
            Some(conv) => conv,
            None => {
                let shell = self.new_shell(&conversation_id);
                self.store.upsert(shell.clone()).await;
                shell
            }
        };

        let pending = self
            .store
            .append_pending(&conversation_id, text)
            .await
            .ok_or_else(|| SyncError::NotFound(format!("会话不存在: {}", conversation_id)))?;
        debug!(
            "[ConvSync] 📝 乐观追加消息: conversationID={}, msgID={}",
            conversation_id, pending.id
        );
        self.notify_changed(&conversation_id).await;

        self.deliver(&conversation, pending).await
    }

    /// 重发 failed 状态的消息
    pub async fn resend(&self, conversation_id: &str, message_id: &str) -> SyncResult<SendOutcome> {
        let conversation = self
            .store
            .get_by_id(conversation_id)
            .await
            .ok_or_else(|| SyncError::NotFound(format!("会话不存在: {}", conversation_id)))?;
        let failed = conversation
            .messages()
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("消息不存在: {}", message_id)))?;
        if failed.status != MessageStatus::Failed {
            return Err(SyncError::Validation(format!(
                "只能重发失败的消息，当前状态: {:?}",
                failed.status
            )));
        }

        info!(
            "[ConvSync] 🔁 重发消息: conversationID={}, msgID={}",
            conversation_id, message_id
        );
        let pending = self
            .store
            .set_message_status(conversation_id, message_id, MessageStatus::Pending)
            .await
            .unwrap_or(Message {
                status: MessageStatus::Pending,
                ..failed
            });
        self.notify_changed(conversation_id).await;
        self.deliver(&conversation, pending).await
    }

    /// 将已追加的 pending 消息发往远端并根据结果确认或标记失败
    async fn deliver(&self, conversation: &Conversation, pending: Message) -> SyncResult<SendOutcome> {
        let conversation_id = conversation.id();
        let pending_id = pending.id.clone();

        if let Conversation::Local(_) = conversation {
            let message = self
                .store
                .set_message_status(conversation_id, &pending_id, MessageStatus::LocalOnly)
                .await
                .unwrap_or(Message {
                    status: MessageStatus::LocalOnly,
                    ..pending
                });
            self.notify_changed(conversation_id).await;
            return Ok(SendOutcome::LocalOnly(message));
        }

        match self.gateway.send_message(conversation_id, &pending.text).await {
            Ok(confirmed) => {
                self.store
                    .replace_message(conversation_id, &pending_id, confirmed.clone())
                    .await;
                info!(
                    "[ConvSync] ✅ 消息已确认: {} -> {}",
                    pending_id, confirmed.id
                );
                self.notify_changed(conversation_id).await;
                Ok(SendOutcome::Confirmed(confirmed))
            }
            Err(e) => {
                let status = match self.policy.decide_send(conversation, &e) {
                    SendDecision::MarkFailed => MessageStatus::Failed,
                    SendDecision::KeepLocal => MessageStatus::LocalOnly,
                };
                error!(
                    "[ConvSync] ❌ 消息发送失败: conversationID={}, msgID={}, 错误: {}",
                    conversation_id, pending_id, e
                );
                let message = self
                    .store
                    .set_message_status(conversation_id, &pending_id, status)
                    .await
                    .unwrap_or(Message { status, ..pending });
                self.listener
                    .on_send_failed(conversation_id, &message, &e.to_string())
                    .await;
                if e.is_unauthorized() {
                    self.listener.on_unauthorized().await;
                }
                self.notify_changed(conversation_id).await;
                Ok(SendOutcome::Failed { message, error: e })
            }
        }
    }

    async fn handle_read_failure(
        &self,
        ticket: &SelectionTicket,
        error: SyncError,
    ) -> SyncResult<LoadOutcome> {
        let conversation_id = ticket.conversation_id.as_str();
        match self.policy.decide_read(&error) {
            ReadDecision::RedirectToLogin => {
                warn!(
                    "[ConvSync] 🔒 会话加载未授权，需要重新登录: conversationID={}",
                    conversation_id
                );
                self.listener
                    .on_sync_failed(conversation_id, &error.to_string())
                    .await;
                self.listener.on_unauthorized().await;
                Err(error)
            }
            ReadDecision::Degrade => {
                warn!(
                    "[ConvSync] ⚠️ 会话加载失败，降级为本地数据: conversationID={}, 错误: {}",
                    conversation_id, error
                );
                let existing = self.store.get_by_id(conversation_id).await;
                let had_existing = existing.is_some();
                let shell = self
                    .policy
                    .degrade_shell(existing, conversation_id, conversation_id);
                if !had_existing {
                    self.store.upsert(shell.clone()).await;
                }
                self.listener
                    .on_sync_failed(conversation_id, &error.to_string())
                    .await;
                self.listener.on_conversation_changed(&shell).await;
                Ok(LoadOutcome::Degraded(error))
            }
        }
    }

    /// 以服务器消息为准，追加本地尚未被服务器接受的消息，
    /// 以及加载期间才被确认、晚于拉取结果的消息
    fn merge(
        &self,
        conversation_id: &str,
        existing: Option<Conversation>,
        fetched: Vec<Message>,
        meta: Option<&ConversationMeta>,
    ) -> Conversation {
        let mut body = match existing {
            Some(conv) => conv.into_body(),
            None => ConversationBody::new(
                conversation_id,
                conversation_id,
                avatar_color_for(conversation_id),
            ),
        };

        let fetched_ids: HashSet<&str> = fetched.iter().map(|m| m.id.as_str()).collect();
        let fetched_until = fetched.last().map(|m| m.ts);
        let local_tail: Vec<Message> = body
            .messages
            .iter()
            .filter(|m| !fetched_ids.contains(m.id.as_str()))
            .filter(|m| {
                m.is_unconfirmed()
                    || (m.status == MessageStatus::Confirmed
                        && fetched_until.map_or(true, |until| m.ts > until))
            })
            .cloned()
            .collect();

        let mut messages = fetched;
        messages.extend(local_tail);
        body.messages = messages;

        if let Some(meta) = meta {
            body.is_group = meta.is_group;
            if let Some(name) = meta.display_name(&self.session.current_user_id) {
                body.name = name;
            }
        }
        body.refresh_summary();
        Conversation::Remote(body)
    }

    fn new_shell(&self, conversation_id: &str) -> Conversation {
        let body = ConversationBody::new(
            conversation_id,
            conversation_id,
            avatar_color_for(conversation_id),
        );
        if self.policy.is_local(conversation_id) {
            Conversation::Local(body)
        } else {
            Conversation::Remote(body)
        }
    }

    async fn notify_changed(&self, conversation_id: &str) {
        if let Some(conv) = self.store.get_by_id(conversation_id).await {
            self.listener.on_conversation_changed(&conv).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::conversation::models::Member;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// 可以挂起的调用：网关进入时通知测试，等待测试放行后再返回
    #[derive(Default)]
    struct Gate {
        entered: Notify,
        release: Notify,
    }

    impl Gate {
        async fn pass(&self) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }

    #[derive(Default)]
    struct ScriptedGateway {
        messages: Mutex<HashMap<String, SyncResult<Vec<Message>>>>,
        metas: Mutex<HashMap<String, ConversationMeta>>,
        fetch_gates: Mutex<HashMap<String, Arc<Gate>>>,
        send_results: Mutex<VecDeque<SyncResult<Message>>>,
        send_gate: Mutex<Option<Arc<Gate>>>,
        created_chat: Mutex<Option<String>>,
        fetch_calls: AtomicUsize,
        send_calls: AtomicUsize,
    }

    impl ScriptedGateway {
        fn with_messages(self, id: &str, result: SyncResult<Vec<Message>>) -> Self {
            self.messages.lock().unwrap().insert(id.to_string(), result);
            self
        }

        fn with_meta(self, id: &str, meta: ConversationMeta) -> Self {
            self.metas.lock().unwrap().insert(id.to_string(), meta);
            self
        }

        fn gate_fetch(&self, id: &str) -> Arc<Gate> {
            let gate = Arc::new(Gate::default());
            self.fetch_gates
                .lock()
                .unwrap()
                .insert(id.to_string(), Arc::clone(&gate));
            gate
        }

        fn gate_send(&self) -> Arc<Gate> {
            let gate = Arc::new(Gate::default());
            *self.send_gate.lock().unwrap() = Some(Arc::clone(&gate));
            gate
        }

        fn push_send(&self, result: SyncResult<Message>) {
            self.send_results.lock().unwrap().push_back(result);
        }
    }

    #[async_trait]
    impl ConversationGateway for ScriptedGateway {
        async fn fetch_messages(&self, conversation_id: &str) -> SyncResult<Vec<Message>> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.fetch_gates.lock().unwrap().get(conversation_id).cloned();
            if let Some(gate) = gate {
                gate.pass().await;
            }
            self.messages
                .lock()
                .unwrap()
                .get(conversation_id)
                .cloned()
                .unwrap_or(Ok(Vec::new()))
        }

        async fn send_message(&self, _conversation_id: &str, text: &str) -> SyncResult<Message> {
            let n = self.send_calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.send_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.pass().await;
            }
            self.send_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(server_msg(&format!("m{}", n + 1), text, true)))
        }

        async fn fetch_conversation_meta(&self, conversation_id: &str) -> SyncResult<ConversationMeta> {
            self.metas
                .lock()
                .unwrap()
                .get(conversation_id)
                .cloned()
                .ok_or_else(|| SyncError::NotFound(conversation_id.to_string()))
        }

        async fn fetch_users(&self, _query: &str) -> SyncResult<Vec<DirectoryUser>> {
            Ok(Vec::new())
        }

        async fn create_chat(&self, _user_id: &str) -> SyncResult<String> {
            self.created_chat
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| SyncError::Transport("down".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        unauthorized: AtomicUsize,
        send_failed: Mutex<Vec<Message>>,
        sync_failed: AtomicUsize,
    }

    #[async_trait]
    impl ConversationListener for RecordingListener {
        async fn on_sync_start(&self, _conversation_id: &str) {}
        async fn on_sync_finish(&self, _conversation_id: &str) {}
        async fn on_sync_failed(&self, _conversation_id: &str, _error: &str) {
            self.sync_failed.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_conversation_changed(&self, _conversation: &Conversation) {}
        async fn on_send_failed(&self, _conversation_id: &str, message: &Message, _error: &str) {
            self.send_failed.lock().unwrap().push(message.clone());
        }
        async fn on_unauthorized(&self) {
            self.unauthorized.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn server_msg(id: &str, text: &str, from_me: bool) -> Message {
        Message {
            id: id.to_string(),
            text: text.to_string(),
            ts: Utc::now(),
            from_me,
            status: MessageStatus::Confirmed,
        }
    }

    struct Harness {
        syncer: Arc<ConversationSyncer>,
        gateway: Arc<ScriptedGateway>,
        listener: Arc<RecordingListener>,
    }

    fn harness(gateway: ScriptedGateway) -> Harness {
        let gateway = Arc::new(gateway);
        let listener = Arc::new(RecordingListener::default());
        let syncer = ConversationSyncer::with_listener(
            Session::new("tok", "me"),
            gateway.clone(),
            Arc::new(ConversationStore::in_memory()),
            Arc::new(FallbackPolicy::new()),
            listener.clone(),
        );
        Harness {
            syncer: Arc::new(syncer),
            gateway,
            listener,
        }
    }

    #[tokio::test]
    async fn select_merges_remote_messages_and_resolves_name() {
        let h = harness(
            ScriptedGateway::default()
                .with_messages(
                    "c1",
                    Ok(vec![server_msg("m1", "hi", false), server_msg("m2", "hey", true)]),
                )
                .with_meta(
                    "c1",
                    ConversationMeta {
                        name: None,
                        is_group: false,
                        members: vec![
                            Member { id: "me".into(), name: Some("Me".into()) },
                            Member { id: "u2".into(), name: Some("Ravi".into()) },
                        ],
                    },
                ),
        );

        assert_eq!(h.syncer.select("c1").await, Ok(LoadOutcome::Loaded));
        let conv = h.syncer.active_conversation().await.unwrap();
        assert!(!conv.is_local());
        assert_eq!(conv.name(), "Ravi");
        assert_eq!(conv.messages().len(), 2);
        assert_eq!(conv.body().last_message.as_deref(), Some("hey"));
    }

    #[tokio::test]
    async fn send_appends_pending_before_network_then_confirms() {
        let h = harness(ScriptedGateway::default());
        h.gateway.push_send(Ok(server_msg("m999", "hello", true)));
        let gate = h.gateway.gate_send();
        h.syncer.select("c1").await.unwrap();

        let syncer = Arc::clone(&h.syncer);
        let send = tokio::spawn(async move { syncer.send("  hello  ").await });
        gate.entered.notified().await;

        // 网络尚未返回，尾部已是乐观消息
        let conv = h.syncer.store().get_by_id("c1").await.unwrap();
        let tail = conv.messages().last().unwrap();
        assert_eq!(tail.id, "pending-1");
        assert_eq!(tail.text, "hello");
        assert!(tail.from_me);
        assert_eq!(tail.status, MessageStatus::Pending);
        let len_before = conv.messages().len();

        gate.release.notify_one();
        let outcome = send.await.unwrap().unwrap();
        assert!(matches!(outcome, SendOutcome::Confirmed(ref m) if m.id == "m999"));

        let conv = h.syncer.store().get_by_id("c1").await.unwrap();
        assert_eq!(conv.messages().len(), len_before);
        let tail = conv.messages().last().unwrap();
        assert_eq!(tail.id, "m999");
        assert_eq!(tail.status, MessageStatus::Confirmed);
        assert!(conv.messages().iter().all(|m| m.id != "pending-1"));
    }

    #[tokio::test]
    async fn late_response_for_deselected_conversation_is_discarded() {
        let h = harness(
            ScriptedGateway::default()
                .with_messages("A", Ok(vec![server_msg("a1", "from A", false)]))
                .with_messages("B", Ok(vec![server_msg("b1", "from B", false)])),
        );
        let gate = h.gateway.gate_fetch("A");

        let syncer = Arc::clone(&h.syncer);
        let load_a = tokio::spawn(async move { syncer.select("A").await });
        gate.entered.notified().await;

        assert_eq!(h.syncer.select("B").await, Ok(LoadOutcome::Loaded));
        gate.release.notify_one();
        assert_eq!(load_a.await.unwrap(), Ok(LoadOutcome::Stale));

        assert_eq!(h.syncer.active_id().as_deref(), Some("B"));
        let active = h.syncer.active_conversation().await.unwrap();
        assert_eq!(active.messages()[0].text, "from B");
        assert!(h.syncer.store().get_by_id("A").await.is_none());
    }

    #[tokio::test]
    async fn transport_failures_always_yield_a_renderable_shell() {
        let gateway = ScriptedGateway::default()
            .with_messages("x", Err(SyncError::Transport("offline".into())))
            .with_messages("y", Err(SyncError::Unexpected("boom".into())));
        let h = harness(gateway);

        for _ in 0..3 {
            for id in ["x", "y"] {
                let outcome = h.syncer.select(id).await.unwrap();
                assert!(matches!(outcome, LoadOutcome::Degraded(_)));
                let conv = h.syncer.active_conversation().await.unwrap();
                assert_eq!(conv.id(), id);
                assert!(conv.messages().is_empty());
            }
        }
        assert_eq!(h.syncer.store().get_all().await.len(), 2);
        assert_eq!(h.listener.sync_failed.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn degrade_keeps_previously_loaded_messages() {
        let h = harness(
            ScriptedGateway::default().with_messages("c1", Ok(vec![server_msg("m1", "hi", false)])),
        );
        h.syncer.select("c1").await.unwrap();
        h.gateway
            .messages
            .lock()
            .unwrap()
            .insert("c1".into(), Err(SyncError::Transport("offline".into())));

        let outcome = h.syncer.select("c1").await.unwrap();
        assert!(matches!(outcome, LoadOutcome::Degraded(SyncError::Transport(_))));
        assert_eq!(h.syncer.active_conversation().await.unwrap().messages().len(), 1);
    }

    #[tokio::test]
    async fn unauthorized_load_surfaces_redirect() {
        let h = harness(ScriptedGateway::default().with_messages("c1", Err(SyncError::Unauthorized)));
        assert_eq!(h.syncer.select("c1").await, Err(SyncError::Unauthorized));
        assert_eq!(h.listener.unauthorized.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_send_keeps_text_and_can_be_resent() {
        let h = harness(ScriptedGateway::default());
        h.gateway.push_send(Err(SyncError::Transport("offline".into())));
        h.gateway.push_send(Ok(server_msg("m42", "are you there?", true)));
        h.syncer.select("c1").await.unwrap();

        let outcome = h.syncer.send("are you there?").await.unwrap();
        let SendOutcome::Failed { message, error } = outcome else {
            panic!("expected failed outcome");
        };
        assert_eq!(error, SyncError::Transport("offline".into()));
        assert_eq!(message.status, MessageStatus::Failed);
        assert_eq!(message.text, "are you there?");

        let conv = h.syncer.store().get_by_id("c1").await.unwrap();
        assert_eq!(conv.messages().last().unwrap().status, MessageStatus::Failed);
        assert_eq!(h.listener.send_failed.lock().unwrap().len(), 1);

        let outcome = h.syncer.resend("c1", &message.id).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Confirmed(ref m) if m.id == "m42"));
        let conv = h.syncer.store().get_by_id("c1").await.unwrap();
        assert_eq!(conv.messages().len(), 1);
        assert_eq!(conv.messages()[0].status, MessageStatus::Confirmed);

        // 已确认的消息不能重发
        assert!(matches!(
            h.syncer.resend("c1", "m42").await,
            Err(SyncError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn unconfirmed_messages_survive_a_refetch() {
        let h = harness(ScriptedGateway::default().with_messages("c1", Ok(vec![server_msg("m1", "hi", false)])));
        h.gateway.push_send(Err(SyncError::Transport("offline".into())));
        h.syncer.select("c1").await.unwrap();
        h.syncer.send("draft").await.unwrap();

        h.syncer.select("c1").await.unwrap();
        let conv = h.syncer.store().get_by_id("c1").await.unwrap();
        let texts: Vec<&str> = conv.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["hi", "draft"]);
        assert_eq!(conv.messages()[1].status, MessageStatus::Failed);
    }

    #[tokio::test]
    async fn unauthorized_send_is_marked_failed_and_redirects() {
        let h = harness(ScriptedGateway::default());
        h.gateway.push_send(Err(SyncError::Unauthorized));
        h.syncer.select("c1").await.unwrap();

        let outcome = h.syncer.send("hi").await.unwrap();
        assert!(matches!(outcome, SendOutcome::Failed { error: SyncError::Unauthorized, .. }));
        assert_eq!(h.listener.unauthorized.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn validation_blocks_send_without_network() {
        let h = harness(ScriptedGateway::default());
        assert!(matches!(h.syncer.send("hello").await, Err(SyncError::Validation(_))));

        h.syncer.select("c1").await.unwrap();
        assert!(matches!(h.syncer.send("   ").await, Err(SyncError::Validation(_))));
        assert_eq!(h.gateway.send_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn local_conversations_never_touch_the_gateway() {
        let h = harness(ScriptedGateway::default());
        h.syncer.policy().seed_samples(h.syncer.store()).await;

        assert_eq!(h.syncer.select("sample-1").await, Ok(LoadOutcome::LocalOnly));
        let outcome = h.syncer.send("offline hello").await.unwrap();
        let SendOutcome::LocalOnly(message) = outcome else {
            panic!("expected local outcome");
        };
        assert_eq!(message.status, MessageStatus::LocalOnly);
        assert!(message.from_me);

        // 混合会话：远端会话照常拉取
        assert_eq!(h.syncer.select("c1").await, Ok(LoadOutcome::Loaded));
        assert_eq!(h.syncer.select("sample-2").await, Ok(LoadOutcome::LocalOnly));

        assert_eq!(h.gateway.fetch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.gateway.send_calls.load(Ordering::SeqCst), 0);
        let conv = h.syncer.store().get_by_id("sample-1").await.unwrap();
        assert_eq!(conv.messages().last().unwrap().text, "offline hello");
    }

    #[tokio::test]
    async fn spawn_select_aborts_previous_load() {
        let h = harness(
            ScriptedGateway::default().with_messages("B", Ok(vec![server_msg("b1", "from B", false)])),
        );
        let gate = h.gateway.gate_fetch("A");

        h.syncer.spawn_select("A");
        gate.entered.notified().await;
        h.syncer.spawn_select("B");

        assert_eq!(h.syncer.join_background_load().await, Some(Ok(LoadOutcome::Loaded)));
        assert_eq!(h.syncer.active_id().as_deref(), Some("B"));
        assert!(h.syncer.store().get_by_id("A").await.is_none());
    }

    #[tokio::test]
    async fn open_conversation_with_directory_user() {
        let h = harness(ScriptedGateway::default());
        *h.gateway.created_chat.lock().unwrap() = Some("c9".to_string());
        let user = DirectoryUser {
            id: "u3".into(),
            name: "Bob".into(),
            last_seen: None,
            online: true,
            contact: "5559876".into(),
        };

        let (id, outcome) = h.syncer.open_conversation_with(&user).await.unwrap();
        assert_eq!(id, "c9");
        assert_eq!(outcome, LoadOutcome::Loaded);
        let conv = h.syncer.active_conversation().await.unwrap();
        assert_eq!(conv.name(), "Bob");
    }

    #[tokio::test]
    async fn provisional_ids_stay_unique_when_syncer_is_rebuilt() {
        let store = Arc::new(ConversationStore::in_memory());
        let policy = Arc::new(FallbackPolicy::new());

        let first_gateway = Arc::new(ScriptedGateway::default());
        first_gateway.push_send(Err(SyncError::Transport("offline".into())));
        let first = ConversationSyncer::new(
            Session::new("tok", "me"),
            first_gateway,
            store.clone(),
            policy.clone(),
        );
        first.select("c1").await.unwrap();
        let SendOutcome::Failed { message: draft, .. } = first.send("first draft").await.unwrap() else {
            panic!("expected failed outcome");
        };

        // 重新登录或更换监听器后，新同步器共用同一个存储
        let second_gateway = Arc::new(ScriptedGateway::default());
        second_gateway.push_send(Ok(server_msg("m2", "second", true)));
        let second = ConversationSyncer::new(Session::new("tok", "me"), second_gateway, store.clone(), policy);
        second.select("c1").await.unwrap();
        let outcome = second.send("second").await.unwrap();
        assert!(matches!(outcome, SendOutcome::Confirmed(ref m) if m.id == "m2"));

        let conv = store.get_by_id("c1").await.unwrap();
        let summary: Vec<(&str, &str, MessageStatus)> = conv
            .messages()
            .iter()
            .map(|m| (m.id.as_str(), m.text.as_str(), m.status))
            .collect();
        assert_eq!(
            summary,
            vec![
                (draft.id.as_str(), "first draft", MessageStatus::Failed),
                ("m2", "second", MessageStatus::Confirmed),
            ]
        );
    }

    #[tokio::test]
    async fn confirmation_during_refetch_is_kept() {
        let mut earlier = server_msg("m1", "hi", false);
        earlier.ts = Utc::now() - chrono::Duration::minutes(1);
        let h = harness(ScriptedGateway::default().with_messages("c1", Ok(vec![earlier])));
        h.gateway.push_send(Ok(server_msg("m999", "hello", true)));
        h.syncer.select("c1").await.unwrap();

        let gate = h.gateway.gate_fetch("c1");
        let syncer = Arc::clone(&h.syncer);
        let refetch = tokio::spawn(async move { syncer.select("c1").await });
        gate.entered.notified().await;

        let outcome = h.syncer.send("hello").await.unwrap();
        assert!(matches!(outcome, SendOutcome::Confirmed(_)));

        gate.release.notify_one();
        assert_eq!(refetch.await.unwrap(), Ok(LoadOutcome::Loaded));

        let conv = h.syncer.store().get_by_id("c1").await.unwrap();
        let ids: Vec<&str> = conv.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m999"]);
        assert_eq!(conv.body().last_message.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn cancel_background_load_stops_pending_write() {
        let h = harness(ScriptedGateway::default());
        let gate = h.gateway.gate_fetch("c1");

        h.syncer.spawn_select("c1");
        gate.entered.notified().await;
        h.syncer.cancel_background_load();
        gate.release.notify_one();

        assert_eq!(h.syncer.join_background_load().await, None);
        assert!(h.syncer.active_id().is_none());
        tokio::task::yield_now().await;
        assert!(h.syncer.store().get_by_id("c1").await.is_none());
    }
}
