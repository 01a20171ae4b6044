//! 登录 / 注册
//!
//! 鉴权服务签发 token 后，再把鉴权身份映射到用户目录中的用户 ID，
//! 消息的 fromMe 判断依赖后者。

use crate::im::conversation::api::{service_url, ServiceEndpoints};
use crate::im::error::{SyncError, SyncResult};
use crate::im::session::Session;
use crate::im::types::{handle_http_response, RawProfile, TokenResp, UsersResp};
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub contact: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub struct RegisterRequest<'a> {
    pub name: &'a str,
    pub contact: &'a str,
    pub password: &'a str,
}

/// 本地校验登录 / 注册参数，失败时不发起任何请求
///
/// `name` 为 `Some` 表示注册。
pub fn validate_credentials(name: Option<&str>, contact: &str, password: &str) -> SyncResult<()> {
    if let Some(name) = name {
        if name.trim().is_empty() {
            return Err(SyncError::Validation("请输入名称".to_string()));
        }
    }
    let contact = contact.trim();
    if !(7..=15).contains(&contact.len()) || !contact.chars().all(|c| c.is_ascii_digit()) {
        return Err(SyncError::Validation(
            "联系方式必须为 7 到 15 位数字".to_string(),
        ));
    }
    if password.chars().count() < 6 {
        return Err(SyncError::Validation("密码至少 6 位".to_string()));
    }
    Ok(())
}

/// 鉴权服务客户端
pub struct AuthApi {
    client: reqwest::Client,
    endpoints: ServiceEndpoints,
}

impl AuthApi {
    pub fn new(client: reqwest::Client, endpoints: ServiceEndpoints) -> Self {
        Self { client, endpoints }
    }

    pub async fn login(&self, contact: &str, password: &str) -> SyncResult<Session> {
        validate_credentials(None, contact, password)?;
        let url = service_url(&self.endpoints.auth_base_url, &["auth", "login"])?;
        info!("[Auth] 🔐 正在登录...");
        debug!("[Auth]    URL: {}", url);

        let body = LoginRequest {
            contact: contact.trim(),
            password,
        };
        let response = self.post(url).json(&body).send().await?;
        let token: TokenResp = handle_http_response(response, "登录").await?;
        self.establish(token).await
    }

    pub async fn register(&self, name: &str, contact: &str, password: &str) -> SyncResult<Session> {
        validate_credentials(Some(name), contact, password)?;
        let url = service_url(&self.endpoints.auth_base_url, &["auth", "register"])?;
        info!("[Auth] 📝 正在注册: {}", name.trim());

        let body = RegisterRequest {
            name: name.trim(),
            contact: contact.trim(),
            password,
        };
        let response = self.post(url).json(&body).send().await?;
        let token: TokenResp = handle_http_response(response, "注册").await?;
        self.establish(token).await
    }

    /// 查询当前 token 对应的鉴权用户
    pub async fn me(&self, bearer: &str) -> SyncResult<RawProfile> {
        let url = service_url(&self.endpoints.auth_base_url, &["auth", "me"])?;
        let response = self
            .client
            .get(url)
            .header("operationID", Uuid::new_v4().to_string())
            .header(AUTHORIZATION, bearer)
            .send()
            .await?;
        handle_http_response(response, "当前用户").await
    }

    /// 拿到 token 后补全会话信息
    async fn establish(&self, token: TokenResp) -> SyncResult<Session> {
        let access_token = token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SyncError::Unexpected("响应中缺少 token".to_string()))?;
        let bearer = format!("Bearer {}", access_token);

        let profile = self.me(&bearer).await?;
        let directory_id = match self.resolve_directory_id(&bearer, &profile.contact).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                debug!("[Auth] 用户目录中没有匹配的联系方式，使用鉴权ID");
                profile.id.clone()
            }
            Err(e) => {
                warn!("[Auth] 用户目录映射失败，使用鉴权ID: {}", e);
                profile.id.clone()
            }
        };

        info!(
            "[Auth] ✅ 登录成功，用户: {}, 目录ID: {}",
            profile.name, directory_id
        );
        Ok(Session {
            token: Some(access_token),
            refresh_token: token.refresh_token,
            current_user_id: directory_id,
            auth_user_id: profile.id,
            user_name: profile.name,
            user_contact: profile.contact,
        })
    }

    /// 按联系方式在用户目录中查找用户 ID
    async fn resolve_directory_id(&self, bearer: &str, contact: &str) -> SyncResult<Option<String>> {
        if contact.is_empty() {
            return Ok(None);
        }
        let url = service_url(&self.endpoints.users_base_url, &["users"])?;
        let response = self
            .client
            .get(url)
            .header("operationID", Uuid::new_v4().to_string())
            .header(AUTHORIZATION, bearer)
            .send()
            .await?;
        let users: UsersResp = handle_http_response(response, "用户目录").await?;
        Ok(users
            .into_users()
            .into_iter()
            .find(|u| u.contact == contact)
            .map(|u| u.id))
    }

    fn post(&self, url: reqwest::Url) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("operationID", Uuid::new_v4().to_string())
    }
}
