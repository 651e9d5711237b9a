use std::path::Path;
use tracing::{debug, info, instrument, warn};

use crate::db::models::{ChatId, MediaContent, Message, MessageId, MessageKind, NewMessage};
use crate::db::operations::DbOperations;
use crate::error::DatabaseError;

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, content, message_type, file_id, \
     local_file_path, file_content, file_name, mime_type, sent_at";

async fn read_local_media(path: &Path) -> Result<Vec<u8>, DatabaseError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| DatabaseError::Media(format!("reading {}: {}", path.display(), e)))
}

impl DbOperations {
    /// Stores a message and returns its id.
    ///
    /// Media messages given only a local cache path get the file's bytes
    /// stored inline. An unreadable file is logged and the message is stored
    /// without inline content.
    #[instrument(
        skip(self, message),
        fields(chat_id = message.chat_id, sender_id = message.sender_id, kind = %message.kind),
        err
    )]
    pub async fn add_message(&self, message: NewMessage) -> Result<MessageId, DatabaseError> {
        let mut message = message;

        if message.kind != MessageKind::Text && message.file_content.is_none() {
            if let Some(path) = message.local_file_path.as_deref() {
                match read_local_media(Path::new(path)).await {
                    Ok(bytes) => message.file_content = Some(bytes),
                    Err(e) => warn!(error = %e, "Storing message without inline media"),
                }
            }
        }

        let id: MessageId = sqlx::query_scalar(
            r#"
            INSERT INTO messages
                (chat_id, sender_id, content, message_type, file_id, local_file_path,
                 file_name, mime_type, file_content)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(message.chat_id)
        .bind(message.sender_id)
        .bind(&message.content)
        .bind(message.kind.as_str())
        .bind(&message.file_id)
        .bind(&message.local_file_path)
        .bind(&message.file_name)
        .bind(&message.mime_type)
        .bind(&message.file_content)
        .fetch_one(self.pool.as_ref())
        .await?;

        debug!(message_id = id, "Message stored");
        Ok(id)
    }

    #[instrument(skip(self), err)]
    pub async fn get_message(&self, message_id: MessageId) -> Result<Option<Message>, DatabaseError> {
        let message = sqlx::query_as::<_, Message>(&format!(
            "SELECT {} FROM messages WHERE id = $1",
            MESSAGE_COLUMNS
        ))
        .bind(message_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(message)
    }

    /// Attaches media bytes to an existing message.
    /// Returns `false` if the message does not exist.
    #[instrument(skip(self, media), fields(size = media.bytes.len()), err)]
    pub async fn save_media_to_db(&self, message_id: MessageId, media: &MediaContent) -> Result<bool, DatabaseError> {
        let updated = sqlx::query(
            r#"
            UPDATE messages
            SET file_content = $2, file_name = $3, mime_type = $4
            WHERE id = $1
            "#,
        )
        .bind(message_id)
        .bind(&media.bytes)
        .bind(&media.file_name)
        .bind(&media.mime_type)
        .execute(self.pool.as_ref())
        .await?
        .rows_affected();

        if updated == 0 {
            warn!(message_id, "No message found to attach media to");
        }
        Ok(updated > 0)
    }

    #[instrument(skip(self), err)]
    pub async fn get_media_content(&self, message_id: MessageId) -> Result<Option<MediaContent>, DatabaseError> {
        let row: Option<(Vec<u8>, Option<String>, Option<String>)> = sqlx::query_as(
            r#"
            SELECT file_content, file_name, mime_type
            FROM messages
            WHERE id = $1 AND file_content IS NOT NULL
            "#,
        )
        .bind(message_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(row.map(|(bytes, file_name, mime_type)| MediaContent {
            bytes,
            file_name,
            mime_type,
        }))
    }

    /// Non-text messages of a chat, newest first, without their inline bytes.
    #[instrument(skip(self), err)]
    pub async fn get_chat_media(&self, chat_id: ChatId) -> Result<Vec<Message>, DatabaseError> {
        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, chat_id, sender_id, content, message_type, file_id, local_file_path,
                   NULL::BYTEA AS file_content, file_name, mime_type, sent_at
            FROM messages
            WHERE chat_id = $1 AND message_type <> 'text'
            ORDER BY sent_at DESC, id DESC
            "#,
        )
        .bind(chat_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(messages)
    }

    /// Deletes all messages of a chat together with their cached media files.
    /// Returns the number of deleted messages.
    #[instrument(skip(self), err)]
    pub async fn clear_chat_messages(&self, chat_id: ChatId) -> Result<u64, DatabaseError> {
        let mut transaction = self.begin_transaction().await?;

        let result = async {
            let paths: Vec<String> = sqlx::query_scalar(
                "SELECT local_file_path FROM messages WHERE chat_id = $1 AND local_file_path IS NOT NULL",
            )
            .bind(chat_id)
            .fetch_all(&mut *transaction)
            .await?;

            let deleted = sqlx::query("DELETE FROM messages WHERE chat_id = $1")
                .bind(chat_id)
                .execute(&mut *transaction)
                .await?
                .rows_affected();
            Ok::<_, sqlx::Error>((paths, deleted))
        }
        .await;

        let (paths, deleted) = match result {
            Ok(outcome) => {
                transaction.commit().await?;
                outcome
            }
            Err(e) => {
                transaction.rollback().await?;
                return Err(e.into());
            }
        };

        for path in paths {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path, "Deleted cached media file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path, error = %e, "Failed to delete cached media file"),
            }
        }

        info!(chat_id, deleted, "Cleared chat messages");
        Ok(deleted)
    }
}
