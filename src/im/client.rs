//! 客户端入口
//!
//! 负责把数据库、凭证、会话存储、远端网关、降级策略与同步器组装在一起。

use crate::im::auth::AuthApi;
use crate::im::conversation::{
    api::{ConversationApi, ServiceEndpoints},
    dao::ConversationDao,
    fallback::{FallbackPolicy, SessionMode},
    listener::{ConversationListener, EmptyConversationListener},
    service::ConversationSyncer,
    store::ConversationStore,
};
use crate::im::db::create_sqlite_pool_with_migration;
use crate::im::error::SyncResult;
use crate::im::session::{Session, SessionDao};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// 客户端配置
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// 鉴权 / 用户目录 / 会话三个服务的地址
    pub endpoints: ServiceEndpoints,
    /// 单次 HTTP 请求的超时时间
    pub request_timeout: Duration,
    /// 本地 SQLite 数据库 URL，`None` 时只保存在内存中
    ///
    /// 例如：`sqlite://messenger.db?mode=rwc`
    pub db_url: Option<String>,
    /// 强制本地模式，不探测后端
    pub offline: bool,
}

impl ClientConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self {
            endpoints: ServiceEndpoints::default(),
            request_timeout: Duration::from_secs(10),
            db_url: None,
            offline: false,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// 客户端
pub struct MessengerClient {
    config: ClientConfig,
    http: reqwest::Client,
    auth: AuthApi,
    session_dao: Option<SessionDao>,
    session: Session,
    store: Arc<ConversationStore>,
    policy: Arc<FallbackPolicy>,
    gateway: Arc<ConversationApi>,
    listener: Arc<dyn ConversationListener>,
    mode: SessionMode,
    syncer: Arc<ConversationSyncer>,
}

impl MessengerClient {
    /// 打开本地数据、恢复凭证并探测后端
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let http = ConversationApi::build_http_client(config.request_timeout)?;
        let auth = AuthApi::new(http.clone(), config.endpoints.clone());

        let (session_dao, conversation_dao) = match &config.db_url {
            Some(url) => {
                let pool = create_sqlite_pool_with_migration(url).await?;
                (
                    Some(SessionDao::new(pool.clone())),
                    Some(ConversationDao::new(pool)),
                )
            }
            None => (None, None),
        };

        let session = match &session_dao {
            Some(dao) => match dao.load().await {
                Ok(Some(session)) => session,
                Ok(None) => Session::anonymous(),
                Err(e) => {
                    warn!("[Client] 读取本地凭证失败，按未登录处理: {:#}", e);
                    Session::anonymous()
                }
            },
            None => Session::anonymous(),
        };

        let store = Arc::new(ConversationStore::open(conversation_dao).await);
        let listener: Arc<dyn ConversationListener> = Arc::new(EmptyConversationListener);
        let policy = Arc::new(FallbackPolicy::new());
        let gateway = Arc::new(ConversationApi::new(
            http.clone(),
            config.endpoints.clone(),
            session.clone(),
        ));
        let syncer = Arc::new(ConversationSyncer::with_listener(
            session.clone(),
            gateway.clone(),
            store.clone(),
            policy.clone(),
            listener.clone(),
        ));

        let mut client = Self {
            config,
            http,
            auth,
            session_dao,
            session,
            store,
            policy,
            gateway,
            listener,
            mode: SessionMode::LocalOnly,
            syncer,
        };
        client.mode = client.detect_mode().await;
        Ok(client)
    }

    /// 注册会话监听器（重建同步器，当前选中状态不保留）
    pub fn set_conversation_listener(&mut self, listener: Arc<dyn ConversationListener>) {
        self.listener = listener;
        self.syncer.cancel_background_load();
        self.syncer = self.build_syncer();
    }

    pub async fn login(&mut self, contact: &str, password: &str) -> SyncResult<&Session> {
        let session = self.auth.login(contact, password).await?;
        self.replace_session(session).await;
        Ok(&self.session)
    }

    pub async fn register(&mut self, name: &str, contact: &str, password: &str) -> SyncResult<&Session> {
        let session = self.auth.register(name, contact, password).await?;
        self.replace_session(session).await;
        Ok(&self.session)
    }

    /// 退出登录：清除凭证和本地会话，回到本地模式
    pub async fn logout(&mut self) {
        self.syncer.cancel_background_load();
        if let Some(dao) = &self.session_dao {
            if let Err(e) = dao.clear().await {
                warn!("[Client] 清除本地凭证失败: {:#}", e);
            }
        }
        self.store.clear().await;
        self.policy = Arc::new(FallbackPolicy::new());
        info!("[Client] 👋 已退出登录");
        self.install_session(Session::anonymous()).await;
    }

    pub fn syncer(&self) -> &Arc<ConversationSyncer> {
        &self.syncer
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn replace_session(&mut self, session: Session) {
        if let Some(dao) = &self.session_dao {
            if let Err(e) = dao.save(&session).await {
                warn!("[Client] 保存凭证失败: {:#}", e);
            }
        }
        self.install_session(session).await;
    }

    async fn install_session(&mut self, session: Session) {
        self.syncer.cancel_background_load();
        self.session = session;
        self.gateway = Arc::new(ConversationApi::new(
            self.http.clone(),
            self.config.endpoints.clone(),
            self.session.clone(),
        ));
        self.syncer = self.build_syncer();
        self.mode = self.detect_mode().await;
    }

    /// 探测后端，本地模式下写入样例会话
    async fn detect_mode(&self) -> SessionMode {
        let mode = if self.config.offline {
            info!("[Client] 已指定离线模式");
            SessionMode::LocalOnly
        } else {
            FallbackPolicy::probe(&self.session, self.gateway.as_ref()).await
        };
        if mode == SessionMode::LocalOnly {
            self.policy.seed_samples(&self.store).await;
        }
        mode
    }

    fn build_syncer(&self) -> Arc<ConversationSyncer> {
        Arc::new(ConversationSyncer::with_listener(
            self.session.clone(),
            self.gateway.clone(),
            self.store.clone(),
            self.policy.clone(),
            self.listener.clone(),
        ))
    }
}
