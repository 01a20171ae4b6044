//! 会话数据访问层（DAO）
//!
//! 每个会话以 JSON 快照的形式存为一行，position 记录插入顺序。

use crate::im::conversation::models::Conversation;
use anyhow::{Context, Result};
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;

/// 会话 DAO（基于 sqlx）
#[derive(Clone)]
pub struct ConversationDao {
    db: Pool<Sqlite>,
}

impl ConversationDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 按插入顺序读取全部会话；任何一行无法解析都视为整体损坏
    pub async fn load_all(&self) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(
            r#"
            SELECT conversation_id, payload
            FROM local_conversations
            ORDER BY position ASC
            "#,
        )
        .fetch_all(&self.db)
        .await
        .context("查询会话列表失败")?;

        let mut conversations = Vec::with_capacity(rows.len());
        for row in rows {
            let conversation_id: String = row.get("conversation_id");
            let payload: String = row.get("payload");
            let conv: Conversation = serde_json::from_str(&payload)
                .with_context(|| format!("会话数据损坏: {}", conversation_id))?;
            conversations.push(conv);
        }

        debug!("[ConvDAO] 读取本地会话，共 {} 个", conversations.len());
        Ok(conversations)
    }

    /// 插入或更新单个会话快照
    pub async fn upsert_conversation(&self, position: usize, conv: &Conversation) -> Result<()> {
        let payload = serde_json::to_string(conv).context("序列化会话失败")?;
        sqlx::query(
            r#"
            INSERT INTO local_conversations (conversation_id, position, payload)
            VALUES (?, ?, ?)
            ON CONFLICT(conversation_id) DO UPDATE SET
                position = excluded.position,
                payload = excluded.payload
            "#,
        )
        .bind(conv.id())
        .bind(position as i64)
        .bind(payload)
        .execute(&self.db)
        .await
        .context("插入或更新会话失败")?;
        Ok(())
    }

    pub async fn delete_all(&self) -> Result<()> {
        sqlx::query("DELETE FROM local_conversations")
            .execute(&self.db)
            .await
            .context("清空会话失败")?;
        Ok(())
    }
}
