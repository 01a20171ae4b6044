//! 会话模块
//!
//! 本地会话存储、远端网关、选中跟踪、降级策略与同步器

pub mod api;
pub mod dao;
pub mod fallback;
pub mod listener;
pub mod models;
pub mod selection;
pub mod service;
pub mod store;

// 重新导出主要类型和函数
pub use api::{ConversationApi, ConversationGateway, ServiceEndpoints};
pub use dao::ConversationDao;
pub use fallback::{FallbackPolicy, SessionMode};
pub use listener::{ConversationListener, EmptyConversationListener};
pub use models::{
    Conversation, ConversationBody, ConversationMeta, ConversationSyncerConfig, DirectoryUser,
    Message, MessageStatus,
};
pub use selection::{ActiveSelection, SelectionTicket};
pub use service::{ConversationSyncer, LoadOutcome, SendOutcome};
pub use store::ConversationStore;
