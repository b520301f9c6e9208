use chrono::{DateTime, Utc};
use domain::{
    ChatStore, Conversation, ConversationId, ConversationType, Membership, Message,
    MessageContent, MessageId, MessageStatus, MessageType, Participant, Presence,
    RepositoryError, RepositoryResult, Timestamp, UserId,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct ConversationRecord {
    id: Uuid,
    conversation_type: String,
    last_message_id: Option<Uuid>,
    last_activity_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct ParticipantRecord {
    conversation_id: Uuid,
    user_id: Uuid,
    can_send_messages: bool,
    last_read_at: Option<DateTime<Utc>>,
}

impl From<ParticipantRecord> for Participant {
    fn from(value: ParticipantRecord) -> Self {
        Participant {
            conversation_id: ConversationId::from(value.conversation_id),
            user_id: UserId::from(value.user_id),
            can_send_messages: value.can_send_messages,
            last_read_at: value.last_read_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    content: String,
    message_type: String,
    status: String,
    reply_to_message_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let content =
            MessageContent::parse(value.content).map_err(|err| invalid_data(err.to_string()))?;
        let message_type =
            MessageType::parse(&value.message_type).map_err(|err| invalid_data(err.to_string()))?;
        let status =
            MessageStatus::parse(&value.status).map_err(|err| invalid_data(err.to_string()))?;

        let mut message = Message::new(
            MessageId::from(value.id),
            ConversationId::from(value.conversation_id),
            UserId::from(value.sender_id),
            content,
            message_type,
            value.reply_to_message_id.map(MessageId::from),
            value.created_at,
        );
        message.status = status;
        Ok(message)
    }
}

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, content, message_type, status, reply_to_message_id, created_at";

/// PostgreSQL 实现的持久化协作方
#[derive(Clone)]
pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<Option<Conversation>> {
        let Some(record) = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT id, conversation_type, last_message_id, last_activity_at
            FROM conversations WHERE id = $1
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        else {
            return Ok(None);
        };

        let participants = sqlx::query_as::<_, ParticipantRecord>(
            r#"
            SELECT conversation_id, user_id, can_send_messages, last_read_at
            FROM conversation_participants
            WHERE conversation_id = $1
            ORDER BY joined_at
            "#,
        )
        .bind(record.id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .into_iter()
        .map(Participant::from)
        .collect();

        let conversation_type = ConversationType::parse(&record.conversation_type)
            .map_err(|err| invalid_data(err.to_string()))?;
        Ok(Some(Conversation {
            id: ConversationId::from(record.id),
            conversation_type,
            participants,
            last_message_id: record.last_message_id.map(MessageId::from),
            last_activity_at: record.last_activity_at,
        }))
    }
}

#[async_trait::async_trait]
impl ChatStore for PgChatStore {
    async fn find_conversation_membership(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<Option<Membership>> {
        let Some(conversation) = self.load_conversation(conversation_id).await? else {
            return Ok(None);
        };
        Ok(conversation
            .participant(user_id)
            .cloned()
            .map(|participant| Membership {
                conversation,
                participant,
            }))
    }

    async fn find_message(&self, id: MessageId) -> RepositoryResult<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }

    async fn create_message(&self, message: &Message) -> RepositoryResult<Message> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            INSERT INTO messages ({MESSAGE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.conversation_id))
        .bind(Uuid::from(message.sender_id))
        .bind(message.content.as_str())
        .bind(message.message_type.as_str())
        .bind(message.status.as_str())
        .bind(message.reply_to_message_id.map(Uuid::from))
        .bind(message.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        let updated = sqlx::query(
            r#"
            UPDATE conversations
            SET last_message_id = $2, last_activity_at = $3
            WHERE id = $1
            "#,
        )
        .bind(Uuid::from(message.conversation_id))
        .bind(Uuid::from(message.id))
        .bind(message.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;
        if updated.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Message::try_from(record)
    }

    async fn update_message_status(
        &self,
        id: MessageId,
        status: MessageStatus,
    ) -> RepositoryResult<Message> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "UPDATE messages SET status = $2 WHERE id = $1 RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(Uuid::from(id))
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;

        Message::try_from(record)
    }

    async fn update_participant_read_cursor(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        read_at: Timestamp,
    ) -> RepositoryResult<()> {
        // 游标只前进不后退
        let result = sqlx::query(
            r#"
            UPDATE conversation_participants
            SET last_read_at = GREATEST(COALESCE(last_read_at, $3), $3)
            WHERE conversation_id = $1 AND user_id = $2
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .bind(Uuid::from(user_id))
        .bind(read_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn upsert_presence(&self, presence: &Presence) -> RepositoryResult<()> {
        let connection_ids: Vec<Uuid> = presence
            .connected_connection_ids
            .iter()
            .map(|id| Uuid::from(*id))
            .collect();

        sqlx::query(
            r#"
            INSERT INTO user_presence (user_id, status, connection_ids, last_seen_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE
            SET status = EXCLUDED.status,
                connection_ids = EXCLUDED.connection_ids,
                last_seen_at = EXCLUDED.last_seen_at
            "#,
        )
        .bind(Uuid::from(presence.user_id))
        .bind(presence.status.as_str())
        .bind(connection_ids)
        .bind(presence.last_seen_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
