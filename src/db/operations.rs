use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::config::DatabaseConfig;
use crate::db::migrations::{self, MigrationReport};
use crate::db::models::{ActiveChat, ChatId, ChatPair, EndedChat, User, UserId};
use crate::db::taxonomy::{self, ReconcileReport};
use crate::error::DatabaseError;

/// Handle to the bot's PostgreSQL database.
///
/// Cloning is cheap; all clones share one connection pool. Every operation
/// checks a connection out of the pool for the duration of one statement or
/// one transaction.
#[derive(Clone)]
pub struct DbOperations {
    pub(crate) pool: Arc<PgPool>,
}

impl DbOperations {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn new_with_options(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, DatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        Ok(Self { pool: Arc::new(pool) })
    }

    /// Connects and brings the schema up to date.
    pub async fn connect(config: &DatabaseConfig) -> Result<(Self, MigrationReport), DatabaseError> {
        let db = Self::new_with_options(&config.url, config.max_connections, config.acquire_timeout()).await?;
        let report = db.run_startup().await;
        info!("Successfully connected to the database");
        Ok((db, report))
    }

    pub async fn disconnect(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!("Successfully disconnected from the database");
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn get_pool_status(&self) -> Result<DbPoolStatus, DatabaseError> {
        if self.pool.is_closed() {
            return Err(DatabaseError::ConnectionError("pool is closed".to_string()));
        }
        let size = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        let active = size.saturating_sub(idle);

        Ok(DbPoolStatus {
            total_connections: size,
            active_connections: active,
            idle_connections: idle,
        })
    }

    pub async fn begin_transaction(&self) -> Result<Transaction<'_, Postgres>, DatabaseError> {
        Ok(self.pool.as_ref().begin().await?)
    }

    /// Create pass, then every pending revision. Never fails as a whole; see the
    /// returned report for per-step outcomes.
    pub async fn run_startup(&self) -> MigrationReport {
        migrations::run_startup(&self.pool).await
    }

    pub async fn create_tables(&self) -> Result<bool, DatabaseError> {
        let (created, _) = migrations::create_tables(&self.pool).await?;
        Ok(created)
    }

    pub async fn migrate_tables(&self) -> MigrationReport {
        migrations::migrate_tables(&self.pool).await
    }

    /// Runs the interest taxonomy reconciliation in its own transaction.
    pub async fn reconcile_interests(&self) -> Result<ReconcileReport, DatabaseError> {
        let mut transaction = self.begin_transaction().await?;

        let result = taxonomy::reconcile_interests(&mut transaction).await;

        match result {
            Ok(report) => {
                transaction.commit().await?;
                Ok(report)
            }
            Err(e) => {
                transaction.rollback().await?;
                Err(e.into())
            }
        }
    }

    // User operations

    /// Inserts the user or refreshes their names.
    #[instrument(skip(self, user), fields(user_id = user.user_id), err)]
    pub async fn add_user(&self, user: &User) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, username, first_name, last_name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id)
            DO UPDATE SET
                username = EXCLUDED.username,
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name
            "#,
        )
        .bind(user.user_id)
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .execute(self.pool.as_ref())
        .await?;

        info!(user_id = user.user_id, "User added or updated");
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn get_user(&self, user_id: UserId) -> Result<Option<User>, DatabaseError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT user_id, username, first_name, last_name, created_at FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(user)
    }

    /// A user is new until they have a profile or have finished the setup dialog.
    #[instrument(skip(self), err)]
    pub async fn is_new_user(&self, user_id: UserId) -> Result<bool, DatabaseError> {
        let known: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (SELECT 1 FROM user_profiles WHERE user_id = $1)
                OR EXISTS (
                    SELECT 1 FROM user_state
                    WHERE user_id = $1 AND profile_setup_state = 'complete'
                )
            "#,
        )
        .bind(user_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(!known)
    }

    // Chat operations

    #[instrument(skip(self), err)]
    pub async fn create_chat(&self, user_id_1: UserId, user_id_2: UserId) -> Result<ChatId, DatabaseError> {
        let chat_id: ChatId = sqlx::query_scalar(
            "INSERT INTO active_chats (user_id_1, user_id_2) VALUES ($1, $2) RETURNING chat_id",
        )
        .bind(user_id_1)
        .bind(user_id_2)
        .fetch_one(self.pool.as_ref())
        .await?;

        info!(chat_id, user_id_1, user_id_2, "Created chat");
        Ok(chat_id)
    }

    #[instrument(skip(self), err)]
    pub async fn get_active_chat(&self, user_id: UserId) -> Result<Option<ActiveChat>, DatabaseError> {
        let pair = sqlx::query_as::<_, ChatPair>(
            r#"
            SELECT chat_id, user_id_1, user_id_2
            FROM active_chats
            WHERE user_id_1 = $1 OR user_id_2 = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(pair.and_then(|pair| {
            pair.partner_of(user_id).map(|partner_id| ActiveChat {
                chat_id: pair.chat_id,
                partner_id,
            })
        }))
    }

    /// All active chats, used to restore in-memory pairing after a restart.
    #[instrument(skip(self), err)]
    pub async fn get_all_active_chats(&self) -> Result<Vec<ChatPair>, DatabaseError> {
        let pairs = sqlx::query_as::<_, ChatPair>(
            "SELECT chat_id, user_id_1, user_id_2 FROM active_chats ORDER BY chat_id",
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(pairs)
    }

    /// Moves the chat to `ended_chats`. Messages are kept.
    /// Returns `false` if no such active chat exists.
    #[instrument(skip(self), err)]
    pub async fn end_chat(&self, chat_id: ChatId) -> Result<bool, DatabaseError> {
        let mut transaction = self.begin_transaction().await?;

        let result = async {
            let moved = sqlx::query(
                r#"
                INSERT INTO ended_chats (chat_id, user_id_1, user_id_2, started_at)
                SELECT chat_id, user_id_1, user_id_2, started_at
                FROM active_chats
                WHERE chat_id = $1
                "#,
            )
            .bind(chat_id)
            .execute(&mut *transaction)
            .await?
            .rows_affected();

            if moved == 0 {
                return Ok(false);
            }

            sqlx::query("DELETE FROM active_chats WHERE chat_id = $1")
                .bind(chat_id)
                .execute(&mut *transaction)
                .await?;
            Ok::<_, sqlx::Error>(true)
        }
        .await;

        match result {
            Ok(ended) => {
                transaction.commit().await?;
                if ended {
                    info!(chat_id, "Chat ended");
                } else {
                    warn!(chat_id, "Cannot end chat: chat does not exist");
                }
                Ok(ended)
            }
            Err(e) => {
                transaction.rollback().await?;
                Err(e.into())
            }
        }
    }

    /// Deletes the chat and all of its messages.
    /// Returns `false` if no such active chat exists.
    #[instrument(skip(self), err)]
    pub async fn remove_chat(&self, chat_id: ChatId) -> Result<bool, DatabaseError> {
        let mut transaction = self.begin_transaction().await?;

        let result = async {
            sqlx::query("DELETE FROM messages WHERE chat_id = $1")
                .bind(chat_id)
                .execute(&mut *transaction)
                .await?;
            let removed = sqlx::query("DELETE FROM active_chats WHERE chat_id = $1")
                .bind(chat_id)
                .execute(&mut *transaction)
                .await?
                .rows_affected();
            Ok::<_, sqlx::Error>(removed > 0)
        }
        .await;

        match result {
            Ok(removed) => {
                transaction.commit().await?;
                if removed {
                    info!(chat_id, "Removed chat and its messages");
                } else {
                    warn!(chat_id, "No chat found to remove");
                }
                Ok(removed)
            }
            Err(e) => {
                transaction.rollback().await?;
                Err(e.into())
            }
        }
    }

    #[instrument(skip(self), err)]
    pub async fn get_ended_chat(&self, chat_id: ChatId) -> Result<Option<EndedChat>, DatabaseError> {
        let chat = sqlx::query_as::<_, EndedChat>(
            "SELECT chat_id, user_id_1, user_id_2, started_at, ended_at FROM ended_chats WHERE chat_id = $1",
        )
        .bind(chat_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(chat)
    }

    // User state operations

    #[instrument(skip(self), err)]
    pub async fn set_user_searching(&self, user_id: UserId, is_searching: bool) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO user_state (user_id, is_searching, last_updated)
            VALUES ($1, $2, clock_timestamp())
            ON CONFLICT (user_id)
            DO UPDATE SET
                is_searching = EXCLUDED.is_searching,
                last_updated = clock_timestamp()
            "#,
        )
        .bind(user_id)
        .bind(is_searching)
        .execute(self.pool.as_ref())
        .await?;

        info!(user_id, is_searching, "Updated searching status");
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn is_user_searching(&self, user_id: UserId) -> Result<bool, DatabaseError> {
        let searching: Option<Option<bool>> =
            sqlx::query_scalar("SELECT is_searching FROM user_state WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(self.pool.as_ref())
                .await?;

        Ok(searching.flatten().unwrap_or(false))
    }

    /// Users waiting for a partner, longest-waiting first.
    #[instrument(skip(self), err)]
    pub async fn get_searching_users(&self) -> Result<Vec<UserId>, DatabaseError> {
        let users = sqlx::query_scalar(
            r#"
            SELECT user_id FROM user_state
            WHERE is_searching = TRUE
            ORDER BY last_updated ASC, user_id ASC
            "#,
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(users)
    }

    #[instrument(skip(self), err)]
    pub async fn update_main_message_id(&self, user_id: UserId, message_id: i64) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO user_state (user_id, main_message_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id)
            DO UPDATE SET main_message_id = EXCLUDED.main_message_id
            "#,
        )
        .bind(user_id)
        .bind(message_id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn get_main_message_id(&self, user_id: UserId) -> Result<Option<i64>, DatabaseError> {
        let id: Option<Option<i64>> =
            sqlx::query_scalar("SELECT main_message_id FROM user_state WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(self.pool.as_ref())
                .await?;

        Ok(id.flatten())
    }

    #[instrument(skip(self), err)]
    pub async fn update_pin_message_id(&self, user_id: UserId, message_id: i64) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO user_state (user_id, pin_message_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id)
            DO UPDATE SET pin_message_id = EXCLUDED.pin_message_id
            "#,
        )
        .bind(user_id)
        .bind(message_id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn get_pin_message_id(&self, user_id: UserId) -> Result<Option<i64>, DatabaseError> {
        let id: Option<Option<i64>> =
            sqlx::query_scalar("SELECT pin_message_id FROM user_state WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(self.pool.as_ref())
                .await?;

        Ok(id.flatten())
    }
}

#[derive(Debug, Clone)]
pub struct DbPoolStatus {
    pub total_connections: u32,
    pub active_connections: u32,
    pub idle_connections: u32,
}
