//! 记忆层：会话消息日志与持久化

pub mod conversation;
pub mod persistence;

pub use conversation::{ConversationSession, ConversationStore, Message, Role};
pub use persistence::ConversationPersistence;
