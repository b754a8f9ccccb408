//! Relational conversation store on SQLite.
//!
//! Conversations live in three tables (`conversations`, `messages`,
//! `summaries`) with cascading foreign keys. Appends are insert-only
//! transactions; only `save_conversation` rewrites child rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_conversation::retention::{self, RetentionCandidate};
use parley_conversation::{
    Conversation, ConversationStats, ConversationStore, HealthReport, Message, MessageRole,
    Metadata, StorageError, StoreLimits, StoreResult, Summary,
};
use parley_core::{ConversationId, MessageId, UserId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, Sqlite, SqliteConnection, Transaction};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument};

const BACKEND: &str = "relational";

/// How long a writer waits for another connection's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection pool tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    /// Connections older than this are closed and replaced.
    pub max_lifetime: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(3600),
        }
    }
}

/// Conversation store backed by a SQLite database.
pub struct SqlConversationStore {
    pool: SqlitePool,
    location: String,
    database_file: Option<PathBuf>,
    limits: StoreLimits,
}

impl SqlConversationStore {
    /// Builds a lazily connecting store. No connection is opened until
    /// [`ConversationStore::initialize`] or the first query.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed.
    pub fn connect_lazy(
        database_url: &str,
        limits: StoreLimits,
        settings: PoolSettings,
    ) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StorageError::BackendUnavailable {
                details: format!("invalid database URL: {e}"),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let filename = options.get_filename().as_os_str();
        let database_file = (!filename.is_empty() && filename != ":memory:")
            .then(|| PathBuf::from(filename));

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .idle_timeout(settings.idle_timeout)
            .max_lifetime(settings.max_lifetime)
            .test_before_acquire(true)
            .connect_lazy_with(options);

        Ok(Self {
            pool,
            location: database_url.to_string(),
            database_file,
            limits,
        })
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Opens a transaction that holds the write lock from its first
    /// statement. Concurrent writers queue on the busy timeout instead of
    /// failing when a read lock cannot be upgraded.
    async fn begin_write(&self) -> StoreResult<Transaction<'static, Sqlite>> {
        Ok(self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(db_error)?)
    }
}

/// Row type for conversation queries.
#[derive(FromRow)]
struct ConversationRow {
    id: i64,
    user_id: String,
    conversation_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    is_active: bool,
    context_window_size: i64,
}

/// Row type for message queries.
#[derive(FromRow)]
struct MessageRow {
    message_id: String,
    role: String,
    content: String,
    timestamp: DateTime<Utc>,
    metadata: Json<Metadata>,
}

/// Row type for summary queries.
#[derive(FromRow)]
struct SummaryRow {
    summary: String,
    key_topics: Json<Vec<String>>,
    created_at: DateTime<Utc>,
    message_count: i64,
}

fn decode_error(what: &str, value: &str, err: impl std::fmt::Display) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("invalid {what} '{value}': {err}"),
    )))
}

impl MessageRow {
    fn try_into_message(self) -> Result<Message, sqlx::Error> {
        let id = MessageId::from_str(&self.message_id)
            .map_err(|e| decode_error("message id", &self.message_id, e))?;
        let role = MessageRole::from_str(&self.role)
            .map_err(|e| decode_error("message role", &self.role, e))?;

        Ok(Message {
            id,
            role,
            content: self.content,
            timestamp: self.timestamp,
            metadata: self.metadata.0,
        })
    }
}

impl SummaryRow {
    fn try_into_summary(self) -> Result<Summary, sqlx::Error> {
        let message_count = usize::try_from(self.message_count)
            .map_err(|e| decode_error("message count", &self.message_count.to_string(), e))?;
        Ok(Summary {
            summary: self.summary,
            key_topics: self.key_topics.0,
            created_at: self.created_at,
            message_count,
        })
    }
}

impl ConversationRow {
    fn try_into_conversation(
        self,
        messages: Vec<Message>,
        summaries: Vec<Summary>,
    ) -> Result<Conversation, sqlx::Error> {
        let user_id = UserId::new(self.user_id.as_str())
            .map_err(|e| decode_error("user id", &self.user_id, e))?;
        let conversation_id = ConversationId::new(self.conversation_id.as_str())
            .map_err(|e| decode_error("conversation id", &self.conversation_id, e))?;
        let context_window_size = usize::try_from(self.context_window_size).map_err(|e| {
            decode_error(
                "context window size",
                &self.context_window_size.to_string(),
                e,
            )
        })?;

        Ok(Conversation {
            user_id,
            conversation_id,
            messages,
            summaries,
            created_at: self.created_at,
            updated_at: self.updated_at,
            is_active: self.is_active,
            context_window_size,
        })
    }
}

fn db_error(err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => StorageError::BackendUnavailable {
            details: err.to_string(),
        },
        other => StorageError::Database {
            details: other.to_string(),
        },
    }
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

async fn find_row(
    conn: &mut SqliteConnection,
    user_id: &UserId,
    conversation_id: &ConversationId,
) -> Result<Option<ConversationRow>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT id, user_id, conversation_id, created_at, updated_at,
               is_active, context_window_size
        FROM conversations
        WHERE user_id = $1 AND conversation_id = $2
        "#,
    )
    .bind(user_id.as_str())
    .bind(conversation_id.as_str())
    .fetch_optional(conn)
    .await
}

async fn find_active_row(
    conn: &mut SqliteConnection,
    user_id: &UserId,
) -> Result<Option<ConversationRow>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT id, user_id, conversation_id, created_at, updated_at,
               is_active, context_window_size
        FROM conversations
        WHERE user_id = $1 AND is_active = 1
        ORDER BY updated_at DESC, conversation_id DESC
        LIMIT 1
        "#,
    )
    .bind(user_id.as_str())
    .fetch_optional(conn)
    .await
}

async fn find_row_for(
    conn: &mut SqliteConnection,
    user_id: &UserId,
    conversation_id: Option<&ConversationId>,
) -> Result<Option<ConversationRow>, sqlx::Error> {
    match conversation_id {
        Some(id) => find_row(conn, user_id, id).await,
        None => find_active_row(conn, user_id).await,
    }
}

async fn hydrate(
    conn: &mut SqliteConnection,
    row: ConversationRow,
) -> Result<Conversation, sqlx::Error> {
    let messages: Vec<MessageRow> = sqlx::query_as(
        r#"
        SELECT message_id, role, content, timestamp, metadata
        FROM messages
        WHERE conversation_id = $1
        ORDER BY timestamp ASC, id ASC
        "#,
    )
    .bind(row.id)
    .fetch_all(&mut *conn)
    .await?;

    let summaries: Vec<SummaryRow> = sqlx::query_as(
        r#"
        SELECT summary, key_topics, created_at, message_count
        FROM summaries
        WHERE conversation_id = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(row.id)
    .fetch_all(&mut *conn)
    .await?;

    let messages = messages
        .into_iter()
        .map(MessageRow::try_into_message)
        .collect::<Result<Vec<_>, _>>()?;
    let summaries = summaries
        .into_iter()
        .map(SummaryRow::try_into_summary)
        .collect::<Result<Vec<_>, _>>()?;
    row.try_into_conversation(messages, summaries)
}

async fn id_in_use(
    conn: &mut SqliteConnection,
    conversation_id: &ConversationId,
) -> Result<bool, sqlx::Error> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT id FROM conversations WHERE conversation_id = $1")
            .bind(conversation_id.as_str())
            .fetch_optional(conn)
            .await?;
    Ok(found.is_some())
}

async fn insert_conversation(
    conn: &mut SqliteConnection,
    conversation: &Conversation,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        INSERT INTO conversations
            (user_id, conversation_id, created_at, updated_at, is_active, context_window_size)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(conversation.user_id.as_str())
    .bind(conversation.conversation_id.as_str())
    .bind(conversation.created_at)
    .bind(conversation.updated_at)
    .bind(conversation.is_active)
    .bind(to_i64(conversation.context_window_size))
    .fetch_one(conn)
    .await
}

async fn insert_message(
    conn: &mut SqliteConnection,
    row_id: i64,
    message: &Message,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO messages (message_id, conversation_id, role, content, timestamp, metadata)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(message.id.to_string())
    .bind(row_id)
    .bind(message.role.as_str())
    .bind(&message.content)
    .bind(message.timestamp)
    .bind(Json(&message.metadata))
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_summary(
    conn: &mut SqliteConnection,
    row_id: i64,
    summary: &Summary,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO summaries (conversation_id, summary, key_topics, created_at, message_count)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(row_id)
    .bind(&summary.summary)
    .bind(Json(&summary.key_topics))
    .bind(summary.created_at)
    .bind(to_i64(summary.message_count))
    .execute(conn)
    .await?;
    Ok(())
}

async fn set_updated_at(
    conn: &mut SqliteConnection,
    row_id: i64,
    updated_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE conversations SET updated_at = $1 WHERE id = $2")
        .bind(updated_at)
        .bind(row_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Deletes the user's oldest archived conversations beyond `max`.
async fn enforce_cap(
    conn: &mut SqliteConnection,
    user_id: &UserId,
    max: usize,
) -> Result<usize, sqlx::Error> {
    if max == 0 {
        return Ok(0);
    }
    let rows: Vec<(String, bool, DateTime<Utc>)> = sqlx::query_as(
        "SELECT conversation_id, is_active, updated_at FROM conversations WHERE user_id = $1",
    )
    .bind(user_id.as_str())
    .fetch_all(&mut *conn)
    .await?;

    let candidates = rows
        .into_iter()
        .map(|(conversation_id, is_active, updated_at)| {
            let conversation_id = ConversationId::new(conversation_id.as_str())
                .map_err(|e| decode_error("conversation id", &conversation_id, e))?;
            Ok(RetentionCandidate {
                conversation_id,
                is_active,
                updated_at,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()?;

    let evictions = retention::select_evictions(candidates, max);
    for conversation_id in &evictions {
        sqlx::query("DELETE FROM conversations WHERE conversation_id = $1")
            .bind(conversation_id.as_str())
            .execute(&mut *conn)
            .await?;
    }
    Ok(evictions.len())
}

#[async_trait]
impl ConversationStore for SqlConversationStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn initialize(&self) -> StoreResult<()> {
        if let Some(parent) = self.database_file.as_deref().and_then(|f| f.parent())
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::BackendUnavailable {
                    details: format!("cannot create {}: {e}", parent.display()),
                })?;
        }

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::BackendUnavailable {
                details: format!("migration failed: {e}"),
            })?;
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        info!(location = %self.location, "relational conversation store initialized");
        Ok(())
    }

    async fn shutdown(&self) -> StoreResult<()> {
        self.pool.close().await;
        info!("relational conversation store shut down");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_conversation(
        &self,
        user_id: &UserId,
        conversation_id: Option<&ConversationId>,
    ) -> StoreResult<Option<Conversation>> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        let Some(row) = find_row_for(&mut conn, user_id, conversation_id)
            .await
            .map_err(db_error)?
        else {
            return Ok(None);
        };
        Ok(Some(hydrate(&mut conn, row).await.map_err(db_error)?))
    }

    #[instrument(skip(self))]
    async fn create_conversation(
        &self,
        user_id: &UserId,
        conversation_id: Option<ConversationId>,
    ) -> StoreResult<Conversation> {
        let mut tx = self.begin_write().await?;

        let conversation_id = match conversation_id {
            Some(id) => {
                if id_in_use(&mut tx, &id).await.map_err(db_error)? {
                    return Err(StorageError::DuplicateConversation {
                        conversation_id: id,
                    }
                    .into());
                }
                id
            }
            None => ConversationId::generate(),
        };
        let conversation = Conversation::new(user_id.clone(), conversation_id)
            .with_context_window_size(self.limits.context_window_size);

        insert_conversation(&mut tx, &conversation)
            .await
            .map_err(db_error)?;
        let evicted = enforce_cap(&mut tx, user_id, self.limits.max_conversations_per_user)
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;

        if evicted > 0 {
            info!(%user_id, evicted, "evicted conversations over per-user cap");
        }
        Ok(conversation)
    }

    async fn save_conversation(&self, conversation: &mut Conversation) -> StoreResult<()> {
        conversation.validate().map_err(StorageError::from)?;
        conversation.touch();
        let mut tx = self.begin_write().await?;

        let row_id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO conversations
                (user_id, conversation_id, created_at, updated_at, is_active, context_window_size)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (conversation_id) DO UPDATE SET
                updated_at = excluded.updated_at,
                is_active = excluded.is_active,
                context_window_size = excluded.context_window_size
            WHERE conversations.user_id = excluded.user_id
            RETURNING id
            "#,
        )
        .bind(conversation.user_id.as_str())
        .bind(conversation.conversation_id.as_str())
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .bind(conversation.is_active)
        .bind(to_i64(conversation.context_window_size))
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

        let Some(row_id) = row_id else {
            return Err(StorageError::DuplicateConversation {
                conversation_id: conversation.conversation_id.clone(),
            }
            .into());
        };

        sqlx::query("DELETE FROM messages WHERE conversation_id = $1")
            .bind(row_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        for message in &conversation.messages {
            insert_message(&mut tx, row_id, message)
                .await
                .map_err(db_error)?;
        }

        sqlx::query("DELETE FROM summaries WHERE conversation_id = $1")
            .bind(row_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        for summary in &conversation.summaries {
            insert_summary(&mut tx, row_id, summary)
                .await
                .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        debug!(
            conversation_id = %conversation.conversation_id,
            messages = conversation.messages.len(),
            "saved conversation"
        );
        Ok(())
    }

    async fn list_conversations(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Conversation>> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        let rows: Vec<ConversationRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, conversation_id, created_at, updated_at,
                   is_active, context_window_size
            FROM conversations
            WHERE user_id = $1
            ORDER BY updated_at DESC, conversation_id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id.as_str())
        .bind(to_i64(limit))
        .bind(to_i64(offset))
        .fetch_all(&mut *conn)
        .await
        .map_err(db_error)?;

        let mut conversations = Vec::with_capacity(rows.len());
        for row in rows {
            conversations.push(hydrate(&mut conn, row).await.map_err(db_error)?);
        }
        Ok(conversations)
    }

    #[instrument(skip(self))]
    async fn archive_conversation(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET is_active = 0,
                updated_at = CASE WHEN is_active = 1 THEN $3 ELSE updated_at END
            WHERE user_id = $1 AND conversation_id = $2
            "#,
        )
        .bind(user_id.as_str())
        .bind(conversation_id.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn delete_conversation(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> StoreResult<bool> {
        let result =
            sqlx::query("DELETE FROM conversations WHERE user_id = $1 AND conversation_id = $2")
                .bind(user_id.as_str())
                .bind(conversation_id.as_str())
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, content, metadata))]
    async fn add_message(
        &self,
        user_id: &UserId,
        role: MessageRole,
        content: &str,
        conversation_id: Option<&ConversationId>,
        metadata: Option<Metadata>,
    ) -> StoreResult<Message> {
        let mut message = Message::new(role, content).map_err(StorageError::from)?;
        if let Some(metadata) = metadata {
            message.metadata = metadata;
        }

        let mut tx = self.begin_write().await?;
        let existing = find_row_for(&mut tx, user_id, conversation_id)
            .await
            .map_err(db_error)?;

        let (row_id, updated_at, created) = match existing {
            Some(row) => (row.id, row.updated_at, false),
            None => {
                let conversation_id = match conversation_id {
                    Some(id) => {
                        if id_in_use(&mut tx, id).await.map_err(db_error)? {
                            return Err(StorageError::DuplicateConversation {
                                conversation_id: id.clone(),
                            }
                            .into());
                        }
                        id.clone()
                    }
                    None => ConversationId::generate(),
                };
                let conversation = Conversation::new(user_id.clone(), conversation_id)
                    .with_context_window_size(self.limits.context_window_size);
                let row_id = insert_conversation(&mut tx, &conversation)
                    .await
                    .map_err(db_error)?;
                (row_id, conversation.updated_at, true)
            }
        };

        let last: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT timestamp FROM messages
            WHERE conversation_id = $1
            ORDER BY timestamp DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(row_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;
        if let Some(last) = last {
            message.timestamp = message.timestamp.max(last);
        }

        insert_message(&mut tx, row_id, &message)
            .await
            .map_err(db_error)?;
        set_updated_at(&mut tx, row_id, Utc::now().max(updated_at))
            .await
            .map_err(db_error)?;
        if created {
            enforce_cap(&mut tx, user_id, self.limits.max_conversations_per_user)
                .await
                .map_err(db_error)?;
        }
        tx.commit().await.map_err(db_error)?;
        Ok(message)
    }

    #[instrument(skip(self, summary, key_topics))]
    async fn create_summary(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
        summary: &str,
        key_topics: Vec<String>,
    ) -> StoreResult<Summary> {
        let mut tx = self.begin_write().await?;
        let Some(row) = find_row(&mut tx, user_id, conversation_id)
            .await
            .map_err(db_error)?
        else {
            return Err(StorageError::ConversationNotFound {
                user_id: user_id.clone(),
                conversation_id: conversation_id.clone(),
            }
            .into());
        };

        let message_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE conversation_id = $1")
                .bind(row.id)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_error)?;
        let latest: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT created_at FROM summaries
            WHERE conversation_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(row.id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

        let created_at = latest.map_or_else(Utc::now, |latest| Utc::now().max(latest));
        let summary = Summary::at(
            summary,
            key_topics,
            usize::try_from(message_count).unwrap_or(0),
            created_at,
        );

        insert_summary(&mut tx, row.id, &summary)
            .await
            .map_err(db_error)?;
        set_updated_at(&mut tx, row.id, Utc::now().max(row.updated_at))
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;
        Ok(summary)
    }

    async fn get_user_stats(&self, user_id: &UserId) -> StoreResult<ConversationStats> {
        let (total, active, messages): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN is_active THEN 1 ELSE 0 END), 0),
                (SELECT COUNT(*) FROM messages m
                   JOIN conversations c ON m.conversation_id = c.id
                   WHERE c.user_id = $1)
            FROM conversations
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        let last_activity: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT updated_at FROM conversations
            WHERE user_id = $1
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(ConversationStats::from_counts(
            user_id.clone(),
            total.unsigned_abs(),
            messages.unsigned_abs(),
            active.unsigned_abs(),
            last_activity,
        ))
    }

    #[instrument(skip(self))]
    async fn cleanup_old_data(&self, days: u32) -> StoreResult<u64> {
        let cutoff = retention::cutoff(days, Utc::now());
        let result =
            sqlx::query("DELETE FROM conversations WHERE is_active = 0 AND updated_at < $1")
                .bind(cutoff)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
        let removed = result.rows_affected();
        info!(removed, days, "cleaned up old conversations");
        Ok(removed)
    }

    async fn health_check(&self) -> HealthReport {
        let counts: Result<(i64, i64, i64, i64), sqlx::Error> = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(DISTINCT user_id) FROM conversations),
                (SELECT COUNT(*) FROM conversations),
                (SELECT COUNT(*) FROM messages),
                (SELECT COUNT(*) FROM conversations WHERE is_active = 1)
            "#,
        )
        .fetch_one(&self.pool)
        .await;

        match counts {
            Ok((users, conversations, messages, active)) => {
                let mut report = HealthReport::healthy(BACKEND).with_location(&self.location);
                report.total_users = Some(users.unsigned_abs());
                report.total_conversations = Some(conversations.unsigned_abs());
                report.total_messages = Some(messages.unsigned_abs());
                report.active_conversations = Some(active.unsigned_abs());
                report
            }
            Err(e) => HealthReport::unhealthy(BACKEND, db_error(e).to_string())
                .with_location(&self.location),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn url(dir: &TempDir) -> String {
        format!("sqlite://{}", dir.path().join("db/conversations.db").display())
    }

    async fn ready_store(dir: &TempDir, limits: StoreLimits) -> SqlConversationStore {
        let store = SqlConversationStore::connect_lazy(&url(dir), limits, PoolSettings::default())
            .expect("valid url");
        store.initialize().await.expect("initialize");
        store
    }

    async fn backdate(store: &SqlConversationStore, conversation_id: &ConversationId, days: i64) {
        sqlx::query("UPDATE conversations SET updated_at = $1 WHERE conversation_id = $2")
            .bind(Utc::now() - ChronoDuration::days(days))
            .bind(conversation_id.as_str())
            .execute(store.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = ready_store(&dir, StoreLimits::default()).await;
        store.initialize().await.unwrap();
        assert!(store.health_check().await.healthy);
    }

    #[tokio::test]
    async fn round_trip_through_save() {
        let dir = TempDir::new().unwrap();
        let store = ready_store(&dir, StoreLimits::default()).await;
        let u1 = user("u1");

        let mut conversation = store.create_conversation(&u1, None).await.unwrap();
        let mut metadata = Metadata::new();
        metadata.insert("chat_id".into(), serde_json::json!(7));
        conversation
            .add_message(MessageRole::User, "Hello", Some(metadata))
            .unwrap();
        conversation
            .add_message(MessageRole::Assistant, "Hi", None)
            .unwrap();
        conversation.add_summary("greeting", vec!["hello".into()]);
        store.save_conversation(&mut conversation).await.unwrap();

        let loaded = store
            .get_conversation(&u1, Some(&conversation.conversation_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, conversation);
    }

    #[tokio::test]
    async fn stats_scenario() {
        let dir = TempDir::new().unwrap();
        let store = ready_store(&dir, StoreLimits::default()).await;
        let u1 = user("u1");
        store
            .add_message(&u1, MessageRole::User, "Hello", None, None)
            .await
            .unwrap();
        store
            .add_message(&u1, MessageRole::Assistant, "Hi", None, None)
            .await
            .unwrap();

        let stats = store.get_user_stats(&u1).await.unwrap();
        assert_eq!(stats.total_messages, 2);
        assert_eq!(stats.total_conversations, 1);
        assert_eq!(stats.active_conversations, 1);
        assert!(stats.last_activity.is_some());

        let empty = store.get_user_stats(&user("nobody")).await.unwrap();
        assert_eq!(empty.total_conversations, 0);
        assert_eq!(empty.avg_messages_per_conversation, 0.0);
    }

    #[tokio::test]
    async fn archive_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = ready_store(&dir, StoreLimits::default()).await;
        let u1 = user("u1");
        let conversation = store.create_conversation(&u1, None).await.unwrap();
        let id = &conversation.conversation_id;

        assert!(store.archive_conversation(&u1, id).await.unwrap());
        let archived = store.get_conversation(&u1, Some(id)).await.unwrap().unwrap();
        assert!(store.archive_conversation(&u1, id).await.unwrap());
        let again = store.get_conversation(&u1, Some(id)).await.unwrap().unwrap();
        assert_eq!(again.updated_at, archived.updated_at);
        assert!(!store.archive_conversation(&user("u2"), id).await.unwrap());
        assert!(store.get_conversation(&u1, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_rejects_invalid_conversations() {
        let dir = TempDir::new().unwrap();
        let store = ready_store(&dir, StoreLimits::default()).await;
        let u1 = user("u1");
        let mut conversation = store.create_conversation(&u1, None).await.unwrap();
        conversation
            .add_message(MessageRole::User, "hello", None)
            .unwrap();
        conversation.messages[0].timestamp = Utc::now() + ChronoDuration::days(365);

        let err = store.save_conversation(&mut conversation).await.unwrap_err();
        assert!(err.to_string().contains("in the future"));
        let stored = store
            .get_conversation(&u1, Some(&conversation.conversation_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.message_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_are_not_lost() {
        let dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(ready_store(&dir, StoreLimits::default()).await);
        let u1 = user("u1");
        let conversation = store.create_conversation(&u1, None).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            let u1 = u1.clone();
            handles.push(tokio::spawn(async move {
                store
                    .add_message(&u1, MessageRole::User, &format!("m{i}"), None, None)
                    .await
                    .unwrap();
            }));
        }
        let summarizer = {
            let store = store.clone();
            let u1 = u1.clone();
            let id = conversation.conversation_id.clone();
            tokio::spawn(async move {
                store
                    .create_summary(&u1, &id, "digest", Vec::new())
                    .await
                    .unwrap();
            })
        };
        for handle in handles {
            handle.await.unwrap();
        }
        summarizer.await.unwrap();

        let conversation = store.get_conversation(&u1, None).await.unwrap().unwrap();
        assert_eq!(conversation.message_count(), 20);
        assert_eq!(conversation.summaries.len(), 1);
    }

    #[tokio::test]
    async fn delete_cascades_to_children() {
        let dir = TempDir::new().unwrap();
        let store = ready_store(&dir, StoreLimits::default()).await;
        let u1 = user("u1");
        store
            .add_message(&u1, MessageRole::User, "Hello", None, None)
            .await
            .unwrap();
        let conversation = store.get_conversation(&u1, None).await.unwrap().unwrap();
        store
            .create_summary(&u1, &conversation.conversation_id, "s", Vec::new())
            .await
            .unwrap();

        assert!(
            store
                .delete_conversation(&u1, &conversation.conversation_id)
                .await
                .unwrap()
        );

        let messages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(store.pool())
            .await
            .unwrap();
        let summaries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM summaries")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(messages, 0);
        assert_eq!(summaries, 0);
        assert!(
            !store
                .delete_conversation(&u1, &conversation.conversation_id)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn duplicate_ids_rejected() {
        let dir = TempDir::new().unwrap();
        let store = ready_store(&dir, StoreLimits::default()).await;
        let id = ConversationId::new("shared").unwrap();
        store
            .create_conversation(&user("u1"), Some(id.clone()))
            .await
            .unwrap();

        let err = store
            .create_conversation(&user("u2"), Some(id.clone()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));

        let mut stolen = Conversation::new(user("u2"), id);
        assert!(store.save_conversation(&mut stolen).await.is_err());
    }

    #[tokio::test]
    async fn cleanup_scenario() {
        let dir = TempDir::new().unwrap();
        let store = ready_store(&dir, StoreLimits::default()).await;
        let u1 = user("u1");
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(
                store
                    .create_conversation(&u1, None)
                    .await
                    .unwrap()
                    .conversation_id,
            );
        }
        for id in &ids[..2] {
            store.archive_conversation(&u1, id).await.unwrap();
            backdate(&store, id, 40).await;
        }

        assert_eq!(store.cleanup_old_data(30).await.unwrap(), 2);
        let remaining = store.list_conversations(&u1, 10, 0).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].conversation_id, ids[2]);
    }

    #[tokio::test]
    async fn summary_does_not_drop_appended_messages() {
        let dir = TempDir::new().unwrap();
        let store = ready_store(&dir, StoreLimits::default()).await;
        let u1 = user("u1");
        store
            .add_message(&u1, MessageRole::User, "one", None, None)
            .await
            .unwrap();
        let snapshot = store.get_conversation(&u1, None).await.unwrap().unwrap();
        store
            .add_message(&u1, MessageRole::User, "two", None, None)
            .await
            .unwrap();

        let summary = store
            .create_summary(&u1, &snapshot.conversation_id, "digest", Vec::new())
            .await
            .unwrap();
        assert_eq!(summary.message_count, 2);

        let conversation = store.get_conversation(&u1, None).await.unwrap().unwrap();
        assert_eq!(conversation.message_count(), 2);
        assert_eq!(conversation.summaries.len(), 1);
    }

    #[tokio::test]
    async fn pagination_is_stable() {
        let dir = TempDir::new().unwrap();
        let store = ready_store(&dir, StoreLimits::default()).await;
        let u1 = user("u1");
        for _ in 0..5 {
            store.create_conversation(&u1, None).await.unwrap();
        }

        let all: Vec<_> = store
            .list_conversations(&u1, 10, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.conversation_id)
            .collect();
        let mut paged = Vec::new();
        for offset in [0, 2, 4] {
            paged.extend(
                store
                    .list_conversations(&u1, 2, offset)
                    .await
                    .unwrap()
                    .into_iter()
                    .map(|c| c.conversation_id),
            );
        }
        assert_eq!(all.len(), 5);
        assert_eq!(paged, all);
    }

    #[tokio::test]
    async fn cap_evicts_oldest_archived() {
        let dir = TempDir::new().unwrap();
        let limits = StoreLimits {
            max_conversations_per_user: 2,
            ..StoreLimits::default()
        };
        let store = ready_store(&dir, limits).await;
        let u1 = user("u1");

        let old = store.create_conversation(&u1, None).await.unwrap();
        store
            .archive_conversation(&u1, &old.conversation_id)
            .await
            .unwrap();
        backdate(&store, &old.conversation_id, 1).await;
        store.create_conversation(&u1, None).await.unwrap();
        store.create_conversation(&u1, None).await.unwrap();

        let stats = store.get_user_stats(&u1).await.unwrap();
        assert_eq!(stats.total_conversations, 2);
        assert_eq!(stats.active_conversations, 2);
        assert!(
            store
                .get_conversation(&u1, Some(&old.conversation_id))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn unknown_role_fails_to_decode() {
        let dir = TempDir::new().unwrap();
        let store = ready_store(&dir, StoreLimits::default()).await;
        let u1 = user("u1");
        store
            .add_message(&u1, MessageRole::User, "hi", None, None)
            .await
            .unwrap();
        sqlx::query("UPDATE messages SET role = 'tool'")
            .execute(store.pool())
            .await
            .unwrap();

        assert!(store.get_conversation(&u1, None).await.is_err());
    }

    #[tokio::test]
    async fn closed_pool_reports_unhealthy() {
        let dir = TempDir::new().unwrap();
        let store = ready_store(&dir, StoreLimits::default()).await;
        store.shutdown().await.unwrap();

        let report = store.health_check().await;
        assert!(!report.healthy);
        assert!(report.error.is_some());
        assert!(store.get_user_stats(&user("u1")).await.is_err());
    }
}
