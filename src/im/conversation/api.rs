//! 会话 HTTP API 客户端
//!
//! 负责所有会话、消息与用户目录相关的 HTTP 请求，本身不保存任何状态。

use crate::im::conversation::models::{
    ConversationMeta, DirectoryUser, Member, Message, MessageStatus,
};
use crate::im::error::{SyncError, SyncResult};
use crate::im::session::Session;
use crate::im::types::{
    handle_http_response, CreatedChat, RawChatMeta, RawMessageRecord, UsersResp,
};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::AUTHORIZATION;
use reqwest::Url;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// 三个后端服务的基础地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoints {
    pub auth_base_url: String,
    pub users_base_url: String,
    pub chats_base_url: String,
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            auth_base_url: "http://localhost:5001/api".to_string(),
            users_base_url: "http://localhost:5002/api".to_string(),
            chats_base_url: "http://localhost:5003/api".to_string(),
        }
    }
}

impl ServiceEndpoints {
    /// 三个服务部署在同一个地址下（测试与单体部署）
    pub fn single(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            auth_base_url: base_url.clone(),
            users_base_url: base_url.clone(),
            chats_base_url: base_url,
        }
    }
}

/// 远端会话网关
#[async_trait]
pub trait ConversationGateway: Send + Sync {
    /// 拉取会话的全部消息（按时间顺序）
    async fn fetch_messages(&self, conversation_id: &str) -> SyncResult<Vec<Message>>;

    /// 发送消息，返回服务器确认后的消息
    async fn send_message(&self, conversation_id: &str, text: &str) -> SyncResult<Message>;

    async fn fetch_conversation_meta(&self, conversation_id: &str) -> SyncResult<ConversationMeta>;

    /// 查询用户目录，空查询返回全部用户
    async fn fetch_users(&self, query: &str) -> SyncResult<Vec<DirectoryUser>>;

    /// 与指定用户创建（或复用已有的）会话，返回会话 ID
    async fn create_chat(&self, user_id: &str) -> SyncResult<String>;
}

/// 把服务器消息记录转换为本地消息，fromMe 由发送者 ID 与当前用户比较得出
pub fn to_message(record: RawMessageRecord, current_user_id: &str) -> Message {
    let from_me = record.sender_id() == Some(current_user_id);
    Message {
        id: record.id,
        text: record.text,
        ts: record.created_at.unwrap_or_else(Utc::now),
        from_me,
        status: MessageStatus::Confirmed,
    }
}

fn to_meta(raw: RawChatMeta) -> ConversationMeta {
    ConversationMeta {
        name: raw.name,
        is_group: raw.is_group_chat,
        members: raw
            .members
            .iter()
            .map(|m| Member {
                id: m.id().to_string(),
                name: m.name().map(str::to_string),
            })
            .collect(),
    }
}

/// 在服务基础地址后追加路径段，每一段都会做百分号编码
pub fn service_url(base_url: &str, segments: &[&str]) -> SyncResult<Url> {
    let mut url = Url::parse(base_url)
        .map_err(|e| SyncError::Unexpected(format!("无效的服务地址 {}: {}", base_url, e)))?;
    url.path_segments_mut()
        .map_err(|_| SyncError::Unexpected(format!("服务地址不能追加路径: {}", base_url)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// 会话相关的 HTTP API 客户端
pub struct ConversationApi {
    client: reqwest::Client,
    endpoints: ServiceEndpoints,
    session: Session,
}

impl ConversationApi {
    /// 创建新的会话 API 客户端
    pub fn new(client: reqwest::Client, endpoints: ServiceEndpoints, session: Session) -> Self {
        Self {
            client,
            endpoints,
            session,
        }
    }

    /// 构建带超时的 HTTP 客户端，超时按网络错误处理
    pub fn build_http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
        use anyhow::Context;
        reqwest::ClientBuilder::new()
            .timeout(timeout)
            .build()
            .context("创建 HTTP 客户端失败")
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn get(&self, url: Url, bearer: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("operationID", Uuid::new_v4().to_string())
            .header(AUTHORIZATION, bearer)
    }

    fn post(&self, url: Url, bearer: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("operationID", Uuid::new_v4().to_string())
            .header(AUTHORIZATION, bearer)
    }
}

#[async_trait]
impl ConversationGateway for ConversationApi {
    async fn fetch_messages(&self, conversation_id: &str) -> SyncResult<Vec<Message>> {
        let bearer = self.session.bearer()?;
        let url = service_url(
            &self.endpoints.chats_base_url,
            &["chats", "message", conversation_id],
        )?;
        debug!("[ConvAPI] 📡 请求会话消息: {}", url);

        let response = self.get(url, &bearer).send().await?;
        let records: Vec<RawMessageRecord> = handle_http_response(response, "会话消息").await?;

        let current_user_id = self.session.current_user_id.as_str();
        let messages: Vec<Message> = records
            .into_iter()
            .map(|r| to_message(r, current_user_id))
            .collect();
        info!(
            "[ConvAPI] ✅ 会话消息响应，conversationID={}, 消息数: {}",
            conversation_id,
            messages.len()
        );
        Ok(messages)
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> SyncResult<Message> {
        let bearer = self.session.bearer()?;
        let url = service_url(&self.endpoints.chats_base_url, &["chats", "message"])?;
        debug!("[ConvAPI] 📡 发送消息，conversationID={}", conversation_id);

        let response = self
            .post(url, &bearer)
            .json(&serde_json::json!({
                "chatId": conversation_id,
                "text": text,
            }))
            .send()
            .await?;
        let record: RawMessageRecord = handle_http_response(response, "发送消息").await?;

        // 自己发送的消息，无论服务器返回的 sender 形态如何都算作 fromMe
        let mut message = to_message(record, &self.session.current_user_id);
        message.from_me = true;
        info!(
            "[ConvAPI] ✅ 消息已确认，conversationID={}, msgID={}",
            conversation_id, message.id
        );
        Ok(message)
    }

    async fn fetch_conversation_meta(&self, conversation_id: &str) -> SyncResult<ConversationMeta> {
        let bearer = self.session.bearer()?;
        let url = service_url(&self.endpoints.chats_base_url, &["chats", conversation_id])?;
        debug!("[ConvAPI] 📡 请求会话元信息: {}", url);

        let response = self.get(url, &bearer).send().await?;
        let raw: RawChatMeta = handle_http_response(response, "会话元信息").await?;
        Ok(to_meta(raw))
    }

    async fn fetch_users(&self, query: &str) -> SyncResult<Vec<DirectoryUser>> {
        let bearer = self.session.bearer()?;
        let url = service_url(&self.endpoints.users_base_url, &["users"])?;
        debug!("[ConvAPI] 📡 请求用户目录: {}", url);

        let response = self.get(url, &bearer).send().await?;
        let resp: UsersResp = handle_http_response(response, "用户目录").await?;

        let q = query.trim().to_lowercase();
        let users: Vec<DirectoryUser> = resp
            .into_users()
            .into_iter()
            .filter(|u| {
                q.is_empty() || u.name.to_lowercase().contains(&q) || u.contact.contains(&q)
            })
            .map(|u| DirectoryUser {
                id: u.id,
                name: u.name,
                last_seen: u.last_seen,
                online: u.online,
                contact: u.contact,
            })
            .collect();
        info!("[ConvAPI] ✅ 用户目录响应，匹配用户数: {}", users.len());
        Ok(users)
    }

    async fn create_chat(&self, user_id: &str) -> SyncResult<String> {
        let bearer = self.session.bearer()?;
        let url = service_url(&self.endpoints.chats_base_url, &["chats"])?;
        debug!("[ConvAPI] 📡 创建会话，对方用户ID: {}", user_id);

        let response = self
            .post(url, &bearer)
            .json(&serde_json::json!({ "userId": user_id }))
            .send()
            .await?;
        let created: CreatedChat = handle_http_response(response, "创建会话").await?;
        info!("[ConvAPI] ✅ 会话已创建或复用: {}", created.id);
        Ok(created.id)
    }
}
