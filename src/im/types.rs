//! 后端 REST 接口的原始数据结构（DTO）与通用响应处理
//!
//! 三个服务（auth / users / chats）直接返回业务 JSON，没有统一的
//! errCode 包装，因此错误只能从 HTTP 状态码和响应体推断。

use crate::im::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// 消息记录里的参与者，后端有时返回完整用户对象，有时只返回用户 ID
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawParticipant {
    User {
        #[serde(rename = "_id")]
        id: String,
        #[serde(default)]
        name: Option<String>,
    },
    Id(String),
}

impl RawParticipant {
    pub fn id(&self) -> &str {
        match self {
            RawParticipant::User { id, .. } => id,
            RawParticipant::Id(id) => id,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            RawParticipant::User { name, .. } => name.as_deref(),
            RawParticipant::Id(_) => None,
        }
    }
}

/// `GET /chats/message/:chatId` 返回的单条消息记录
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessageRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sender: Option<RawParticipant>,
    #[serde(default)]
    pub receiver: Option<RawParticipant>,
}

impl RawMessageRecord {
    pub fn sender_id(&self) -> Option<&str> {
        self.sender.as_ref().map(|s| s.id())
    }
}

/// `GET /chats/:id` 返回的会话元信息
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChatMeta {
    #[serde(default, alias = "chatName")]
    pub name: Option<String>,
    #[serde(default)]
    pub members: Vec<RawParticipant>,
    #[serde(default)]
    pub is_group_chat: bool,
}

/// 用户目录中的一条记录
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawUser {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub online: bool,
    #[serde(
        default,
        deserialize_with = "crate::im::serialization::deserialize_string_or_number"
    )]
    pub contact: String,
}

/// `GET /users` 既可能直接返回数组，也可能包一层 `{ users: [...] }`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UsersResp {
    List(Vec<RawUser>),
    Wrapped { users: Vec<RawUser> },
}

impl UsersResp {
    pub fn into_users(self) -> Vec<RawUser> {
        match self {
            UsersResp::List(users) => users,
            UsersResp::Wrapped { users } => users,
        }
    }
}

/// `POST /chats` 的响应（创建或复用已有会话）
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedChat {
    #[serde(rename = "_id")]
    pub id: String,
}

/// `POST /auth/login` 与 `POST /auth/register` 的响应
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResp {
    #[serde(default, alias = "token")]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// `GET /auth/me` 返回的用户资料
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawProfile {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(
        default,
        deserialize_with = "crate::im::serialization::deserialize_string_or_number"
    )]
    pub contact: String,
}

/// 非 2xx 响应中可能携带的结构化错误体
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// 根据 HTTP 状态码和响应体把失败归类为 [`SyncError`]
pub fn classify_failure(status: u16, body: &[u8]) -> SyncError {
    let structured = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message.or(b.error))
        .filter(|m| !m.trim().is_empty());

    match status {
        401 | 403 => SyncError::Unauthorized,
        404 => SyncError::NotFound(structured.unwrap_or_else(|| "HTTP 404".to_string())),
        _ => match structured {
            Some(msg) => SyncError::Unexpected(format!("HTTP {}: {}", status, msg)),
            None => SyncError::Transport(format!("HTTP {}", status)),
        },
    }
}

/// 通用 HTTP 响应处理：检查状态码后直接反序列化为目标结构体
pub async fn handle_http_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> SyncResult<T> {
    let status = response.status();

    // body 只能读取一次
    let body_bytes = response.bytes().await?;
    let body_str = String::from_utf8_lossy(&body_bytes);
    debug!("[HTTP] {}响应 Body: {}", operation_name, body_str);

    if !status.is_success() {
        error!(
            "[HTTP] {}请求失败，HTTP状态: {}, 响应: {}",
            operation_name, status, body_str
        );
        return Err(classify_failure(status.as_u16(), &body_bytes));
    }
    debug!("[HTTP] {}请求成功，HTTP状态: {}", operation_name, status);

    serde_json::from_slice::<T>(&body_bytes).map_err(|e| {
        error!(
            "[HTTP] {}反序列化失败: {:?}\n原始响应: {}",
            operation_name, e, body_str
        );
        SyncError::from(e)
    })
}
