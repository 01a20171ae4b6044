pub mod im;

// 重新导出常用类型和函数，方便外部使用
pub use im::{
    client::{ClientConfig, MessengerClient},
    conversation::{
        Conversation, ConversationGateway, ConversationListener, ConversationStore,
        ConversationSyncer, LoadOutcome, Message, MessageStatus, SendOutcome,
    },
    Session, SyncError,
};
