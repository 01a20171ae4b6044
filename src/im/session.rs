//! 登录会话上下文与凭证持久化
//!
//! 凭证与当前用户 ID 通过 [`Session`] 显式传入网关与同步器，
//! 不再从全局存储中隐式读取。

use crate::im::error::{SyncError, SyncResult};
use anyhow::{Context, Result};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info};

/// 当前登录会话
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// Bearer token，缺失时所有需要鉴权的调用都会直接返回 Unauthorized
    pub token: Option<String>,
    pub refresh_token: Option<String>,
    /// 用户目录服务中的用户 ID，用于计算 fromMe
    pub current_user_id: String,
    /// 鉴权服务中的用户 ID（与目录 ID 可能不同）
    pub auth_user_id: String,
    pub user_name: String,
    pub user_contact: String,
}

impl Session {
    pub fn new(token: impl Into<String>, current_user_id: impl Into<String>) -> Self {
        let current_user_id = current_user_id.into();
        Self {
            token: Some(token.into()),
            auth_user_id: current_user_id.clone(),
            current_user_id,
            ..Default::default()
        }
    }

    /// 未登录的匿名会话（只能运行在本地模式）
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// 返回 `Bearer ...` 头，没有凭证时返回 Unauthorized（不发起任何请求）
    pub fn bearer(&self) -> SyncResult<String> {
        match self.token.as_deref() {
            Some(token) if !token.is_empty() => Ok(format!("Bearer {}", token)),
            _ => Err(SyncError::Unauthorized),
        }
    }
}

const KEY_TOKEN: &str = "token";
const KEY_REFRESH_TOKEN: &str = "refreshToken";
const KEY_USER_ID: &str = "userId";
const KEY_AUTH_USER_ID: &str = "authUserId";
const KEY_USER_NAME: &str = "userName";
const KEY_USER_CONTACT: &str = "userContact";

/// 凭证持久化 DAO（键值表 local_session）
pub struct SessionDao {
    db: Pool<Sqlite>,
}

impl SessionDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 读取持久化的会话，没有 token 时返回 None
    pub async fn load(&self) -> Result<Option<Session>> {
        let rows = sqlx::query("SELECT key, value FROM local_session")
            .fetch_all(&self.db)
            .await
            .context("查询本地会话失败")?;

        let mut session = Session::default();
        for row in rows {
            let key: String = row.get("key");
            let value: String = row.get("value");
            match key.as_str() {
                KEY_TOKEN => session.token = Some(value),
                KEY_REFRESH_TOKEN => session.refresh_token = Some(value),
                KEY_USER_ID => session.current_user_id = value,
                KEY_AUTH_USER_ID => session.auth_user_id = value,
                KEY_USER_NAME => session.user_name = value,
                KEY_USER_CONTACT => session.user_contact = value,
                other => debug!("[SessionDAO] 忽略未知键: {}", other),
            }
        }

        if session.is_authenticated() {
            debug!(
                "[SessionDAO] 读取到本地会话，用户ID: {}",
                session.current_user_id
            );
            Ok(Some(session))
        } else {
            Ok(None)
        }
    }

    /// 保存会话（整体覆盖）
    pub async fn save(&self, session: &Session) -> Result<()> {
        let mut tx = self.db.begin().await.context("开启事务失败")?;
        sqlx::query("DELETE FROM local_session")
            .execute(&mut *tx)
            .await
            .context("清理旧会话失败")?;

        let mut entries: Vec<(&str, &str)> = vec![
            (KEY_USER_ID, session.current_user_id.as_str()),
            (KEY_AUTH_USER_ID, session.auth_user_id.as_str()),
            (KEY_USER_NAME, session.user_name.as_str()),
            (KEY_USER_CONTACT, session.user_contact.as_str()),
        ];
        if let Some(token) = session.token.as_deref() {
            entries.push((KEY_TOKEN, token));
        }
        if let Some(refresh) = session.refresh_token.as_deref() {
            entries.push((KEY_REFRESH_TOKEN, refresh));
        }

        for (key, value) in entries {
            sqlx::query("INSERT INTO local_session (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await
                .context("保存会话失败")?;
        }
        tx.commit().await.context("提交会话失败")?;

        info!("[SessionDAO] 会话已保存，用户ID: {}", session.current_user_id);
        Ok(())
    }

    /// 清除会话（退出登录）
    pub async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM local_session")
            .execute(&self.db)
            .await
            .context("清除会话失败")?;
        info!("[SessionDAO] 本地会话已清除");
        Ok(())
    }
}
