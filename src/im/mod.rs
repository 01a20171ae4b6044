pub mod auth;
pub mod client;
pub mod conversation;
pub mod db;
pub mod error;
pub mod serialization;
pub mod session;
pub mod types;

// 重新导出认证相关类型
pub use auth::{validate_credentials, AuthApi};
pub use error::{SyncError, SyncResult};
pub use session::{Session, SessionDao};

// 重新导出会话同步相关类型
pub use conversation::{
    Conversation, ConversationStore, ConversationSyncer, ConversationSyncerConfig, Message,
    MessageStatus,
};
