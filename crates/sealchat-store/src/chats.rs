//! Chats and chat membership.

use rusqlite::params;

use sealchat_shared::types::{now_millis, ChatId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{id_col, Chat};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create a chat with an initial member set, atomically.
    pub fn create_chat(&mut self, name: &str, members: &[UserId]) -> Result<Chat> {
        let chat = Chat {
            id: ChatId::new(),
            name: name.to_string(),
            created_at: now_millis(),
        };

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO chats (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![chat.id.to_string(), chat.name, chat.created_at],
        )?;
        for member in members {
            tx.execute(
                "INSERT OR IGNORE INTO chat_members (chat_id, user_id, joined_at)
                 VALUES (?1, ?2, ?3)",
                params![chat.id.to_string(), member.to_string(), chat.created_at],
            )?;
        }
        tx.commit()?;

        tracing::debug!(chat = %chat.id, members = members.len(), "chat created");
        Ok(chat)
    }

    /// Add a member to an existing chat. Idempotent.
    pub fn add_member(&self, chat_id: &ChatId, user_id: &UserId) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO chat_members (chat_id, user_id, joined_at)
             VALUES (?1, ?2, ?3)",
            params![chat_id.to_string(), user_id.to_string(), now_millis()],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_chat(&self, id: &ChatId) -> Result<Chat> {
        self.conn()
            .query_row(
                "SELECT id, name, created_at FROM chats WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(Chat {
                        id: id_col(row, 0)?,
                        name: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn is_member(&self, chat_id: &ChatId, user_id: &UserId) -> Result<bool> {
        let found: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id.to_string(), user_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(found > 0)
    }

    /// Members in join order.
    pub fn list_members(&self, chat_id: &ChatId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM chat_members
             WHERE chat_id = ?1
             ORDER BY joined_at ASC, rowid ASC",
        )?;

        let rows = stmt.query_map(params![chat_id.to_string()], |row| id_col(row, 0))?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }
}
