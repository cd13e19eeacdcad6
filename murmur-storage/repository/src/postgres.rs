use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use murmur_im_core::PostgresInstanceConfig;
use murmur_storage_model::{
    AddMembersOutcome, Attachment, CallParticipant, CallRepository, CallStatus, CallType,
    ConnectionQuality, Conversation, GroupCall, GroupPermission, GroupRepository, GroupRole,
    JoinOutcome, JoinRequest, JoinRequestRepository, JoinRequestStatus, LeaveOutcome, MediaType,
    Message, MessageRepository, MessageStatus, MessageType, NewAttachment, NewCallParticipant,
    NewGroup, NewMessage, Participant, PermissionType, PersistOutcome, Reaction,
    ReactionRepository,
};

const DEFAULT_MAX_CONNECTIONS: u32 = 10;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id BIGSERIAL PRIMARY KEY,
        client_message_id UUID UNIQUE,
        conversation_id BIGINT NOT NULL,
        sender_id BIGINT NOT NULL,
        content TEXT NOT NULL,
        message_type TEXT NOT NULL,
        content_type TEXT NOT NULL DEFAULT 'text',
        target_id BIGINT,
        reply_to_message_id BIGINT,
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages (conversation_id, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS message_attachments (
        id BIGSERIAL PRIMARY KEY,
        message_id BIGINT NOT NULL REFERENCES messages (id) ON DELETE CASCADE,
        file_name TEXT NOT NULL,
        file_url TEXT NOT NULL,
        file_type TEXT NOT NULL,
        file_size BIGINT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS message_reactions (
        id BIGSERIAL PRIMARY KEY,
        message_id BIGINT NOT NULL,
        user_id BIGINT NOT NULL,
        emoji TEXT NOT NULL,
        reacted_at TIMESTAMPTZ NOT NULL,
        UNIQUE (message_id, user_id, emoji)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS conversations (
        id BIGSERIAL PRIMARY KEY,
        is_group BOOLEAN NOT NULL DEFAULT FALSE,
        name TEXT,
        description TEXT,
        max_members INTEGER NOT NULL DEFAULT 256,
        is_public BOOLEAN NOT NULL DEFAULT FALSE,
        require_approval BOOLEAN NOT NULL DEFAULT FALSE,
        invite_link TEXT UNIQUE,
        created_by BIGINT,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS conversation_participants (
        conversation_id BIGINT NOT NULL REFERENCES conversations (id) ON DELETE CASCADE,
        user_id BIGINT NOT NULL,
        role TEXT NOT NULL,
        joined_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (conversation_id, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS group_permissions (
        conversation_id BIGINT NOT NULL REFERENCES conversations (id) ON DELETE CASCADE,
        permission_type TEXT NOT NULL,
        required_role TEXT NOT NULL,
        PRIMARY KEY (conversation_id, permission_type)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS group_join_requests (
        id BIGSERIAL PRIMARY KEY,
        conversation_id BIGINT NOT NULL REFERENCES conversations (id) ON DELETE CASCADE,
        user_id BIGINT NOT NULL,
        message TEXT,
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        reviewed_by BIGINT,
        reviewed_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS uq_join_requests_pending
        ON group_join_requests (conversation_id, user_id) WHERE status = 'pending'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS group_calls (
        id TEXT PRIMARY KEY,
        group_id BIGINT NOT NULL,
        initiator_id BIGINT NOT NULL,
        call_type TEXT NOT NULL,
        status TEXT NOT NULL,
        max_participants INTEGER NOT NULL,
        started_at TIMESTAMPTZ NOT NULL,
        ended_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS uq_group_calls_active
        ON group_calls (group_id) WHERE status = 'active'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS call_participants (
        id BIGSERIAL PRIMARY KEY,
        call_id TEXT NOT NULL REFERENCES group_calls (id) ON DELETE CASCADE,
        user_id BIGINT NOT NULL,
        joined_at TIMESTAMPTZ NOT NULL,
        left_at TIMESTAMPTZ,
        is_audio_enabled BOOLEAN NOT NULL DEFAULT TRUE,
        is_video_enabled BOOLEAN NOT NULL DEFAULT TRUE,
        connection_quality TEXT NOT NULL DEFAULT 'good'
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS uq_call_participants_open
        ON call_participants (call_id, user_id) WHERE left_at IS NULL
    "#,
];

fn parse_column<T>(value: &str, column: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|err| anyhow!("invalid {column} column: {err}"))
}

fn to_u32(value: i32, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("negative {column} column: {value}"))
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: i64,
    client_message_id: Option<Uuid>,
    conversation_id: i64,
    sender_id: i64,
    content: String,
    message_type: String,
    content_type: String,
    target_id: Option<i64>,
    reply_to_message_id: Option<i64>,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Message {
            id: row.id,
            conversation_id: row.conversation_id,
            sender_id: row.sender_id,
            content: row.content,
            message_type: parse_column::<MessageType>(&row.message_type, "message_type")?,
            content_type: row.content_type,
            target_id: row.target_id,
            reply_to_message_id: row.reply_to_message_id,
            status: parse_column::<MessageStatus>(&row.status, "status")?,
            created_at: row.created_at,
            client_message_id: row.client_message_id,
        })
    }
}

#[derive(Debug, FromRow)]
struct AttachmentRow {
    id: i64,
    message_id: i64,
    file_name: String,
    file_url: String,
    file_type: String,
    file_size: i64,
    created_at: DateTime<Utc>,
}

impl From<AttachmentRow> for Attachment {
    fn from(row: AttachmentRow) -> Self {
        Attachment {
            id: row.id,
            message_id: row.message_id,
            file_name: row.file_name,
            file_url: row.file_url,
            file_type: row.file_type,
            file_size: row.file_size,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ReactionRow {
    id: i64,
    message_id: i64,
    user_id: i64,
    emoji: String,
    reacted_at: DateTime<Utc>,
}

impl From<ReactionRow> for Reaction {
    fn from(row: ReactionRow) -> Self {
        Reaction {
            id: row.id,
            message_id: row.message_id,
            user_id: row.user_id,
            emoji: row.emoji,
            reacted_at: row.reacted_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ConversationRow {
    id: i64,
    is_group: bool,
    name: Option<String>,
    description: Option<String>,
    max_members: i32,
    is_public: bool,
    require_approval: bool,
    invite_link: Option<String>,
    created_by: Option<i64>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = anyhow::Error;

    fn try_from(row: ConversationRow) -> Result<Self, Self::Error> {
        Ok(Conversation {
            id: row.id,
            is_group: row.is_group,
            name: row.name,
            description: row.description,
            max_members: to_u32(row.max_members, "max_members")?,
            is_public: row.is_public,
            require_approval: row.require_approval,
            invite_link: row.invite_link,
            created_by: row.created_by,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ParticipantRow {
    conversation_id: i64,
    user_id: i64,
    role: String,
    joined_at: DateTime<Utc>,
}

impl TryFrom<ParticipantRow> for Participant {
    type Error = anyhow::Error;

    fn try_from(row: ParticipantRow) -> Result<Self, Self::Error> {
        Ok(Participant {
            conversation_id: row.conversation_id,
            user_id: row.user_id,
            role: parse_column::<GroupRole>(&row.role, "role")?,
            joined_at: row.joined_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PermissionRow {
    conversation_id: i64,
    permission_type: String,
    required_role: String,
}

impl TryFrom<PermissionRow> for GroupPermission {
    type Error = anyhow::Error;

    fn try_from(row: PermissionRow) -> Result<Self, Self::Error> {
        Ok(GroupPermission {
            conversation_id: row.conversation_id,
            permission_type: parse_column::<PermissionType>(
                &row.permission_type,
                "permission_type",
            )?,
            required_role: parse_column::<GroupRole>(&row.required_role, "required_role")?,
        })
    }
}

#[derive(Debug, FromRow)]
struct JoinRequestRow {
    id: i64,
    conversation_id: i64,
    user_id: i64,
    message: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    reviewed_by: Option<i64>,
    reviewed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JoinRequestRow> for JoinRequest {
    type Error = anyhow::Error;

    fn try_from(row: JoinRequestRow) -> Result<Self, Self::Error> {
        Ok(JoinRequest {
            id: row.id,
            conversation_id: row.conversation_id,
            user_id: row.user_id,
            message: row.message,
            status: parse_column::<JoinRequestStatus>(&row.status, "status")?,
            created_at: row.created_at,
            reviewed_by: row.reviewed_by,
            reviewed_at: row.reviewed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct CallRow {
    id: String,
    group_id: i64,
    initiator_id: i64,
    call_type: String,
    status: String,
    max_participants: i32,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl TryFrom<CallRow> for GroupCall {
    type Error = anyhow::Error;

    fn try_from(row: CallRow) -> Result<Self, Self::Error> {
        Ok(GroupCall {
            id: row.id,
            group_id: row.group_id,
            initiator_id: row.initiator_id,
            call_type: parse_column::<CallType>(&row.call_type, "call_type")?,
            status: parse_column::<CallStatus>(&row.status, "status")?,
            max_participants: to_u32(row.max_participants, "max_participants")?,
            started_at: row.started_at,
            ended_at: row.ended_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct CallParticipantRow {
    id: i64,
    call_id: String,
    user_id: i64,
    joined_at: DateTime<Utc>,
    left_at: Option<DateTime<Utc>>,
    is_audio_enabled: bool,
    is_video_enabled: bool,
    connection_quality: String,
}

impl TryFrom<CallParticipantRow> for CallParticipant {
    type Error = anyhow::Error;

    fn try_from(row: CallParticipantRow) -> Result<Self, Self::Error> {
        Ok(CallParticipant {
            id: row.id,
            call_id: row.call_id,
            user_id: row.user_id,
            joined_at: row.joined_at,
            left_at: row.left_at,
            is_audio_enabled: row.is_audio_enabled,
            is_video_enabled: row.is_video_enabled,
            connection_quality: parse_column::<ConnectionQuality>(
                &row.connection_quality,
                "connection_quality",
            )?,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = anyhow::Error>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// 基于 PostgreSQL 的聊天存储
///
/// 需要原子性的操作在事务内执行，并对群、通话行加 `FOR UPDATE` 锁。
/// 每个群最多一个 active 通话由部分唯一索引兜底。
#[derive(Clone)]
pub struct PostgresChatStore {
    pool: Arc<PgPool>,
}

impl PostgresChatStore {
    pub async fn connect(config: &PostgresInstanceConfig) -> Result<Self> {
        let mut options =
            PgPoolOptions::new().max_connections(config.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS));
        if let Some(min) = config.min_connections {
            options = options.min_connections(min);
        }
        let pool = options
            .connect(&config.url)
            .await
            .context("failed to connect to postgres")?;

        info!(max_connections = ?config.max_connections, "postgres chat store connected");
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .context("failed to begin postgres transaction")
    }

    /// 建表（幂等）
    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(self.pool())
                .await
                .context("failed to initialize chat schema")?;
        }
        debug!(statements = SCHEMA.len(), "chat schema ready");
        Ok(())
    }

    async fn insert_participants(
        tx: &mut Transaction<'static, Postgres>,
        group_id: i64,
        user_ids: &[i64],
        role: GroupRole,
        joined_at: DateTime<Utc>,
    ) -> Result<Vec<Participant>> {
        let mut added = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            let row = sqlx::query_as::<_, ParticipantRow>(
                r#"
                INSERT INTO conversation_participants (conversation_id, user_id, role, joined_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (conversation_id, user_id) DO NOTHING
                RETURNING conversation_id, user_id, role, joined_at
                "#,
            )
            .bind(group_id)
            .bind(user_id)
            .bind(role.as_str())
            .bind(joined_at)
            .fetch_optional(&mut **tx)
            .await
            .context("failed to insert group participant")?;
            if let Some(row) = row {
                added.push(row.try_into()?);
            }
        }
        Ok(added)
    }

    async fn write_permissions(
        tx: &mut Transaction<'static, Postgres>,
        group_id: i64,
        permissions: &[(PermissionType, GroupRole)],
    ) -> Result<()> {
        for (permission, role) in permissions {
            sqlx::query(
                r#"
                INSERT INTO group_permissions (conversation_id, permission_type, required_role)
                VALUES ($1, $2, $3)
                ON CONFLICT (conversation_id, permission_type)
                DO UPDATE SET required_role = EXCLUDED.required_role
                "#,
            )
            .bind(group_id)
            .bind(permission.as_str())
            .bind(role.as_str())
            .execute(&mut **tx)
            .await
            .context("failed to write group permission")?;
        }
        Ok(())
    }

    async fn count_open_participants(
        tx: &mut Transaction<'static, Postgres>,
        call_id: &str,
    ) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM call_participants WHERE call_id = $1 AND left_at IS NULL",
        )
        .bind(call_id)
        .fetch_one(&mut **tx)
        .await
        .context("failed to count call participants")?;
        Ok(count as u32)
    }

    async fn update_open_participant(
        &self,
        call_id: &str,
        user_id: i64,
        column: &str,
        sql_value: ParticipantUpdate,
    ) -> Result<Option<CallParticipant>> {
        let sql = format!(
            r#"
            UPDATE call_participants SET {column} = $3
            WHERE call_id = $1 AND user_id = $2 AND left_at IS NULL
            RETURNING id, call_id, user_id, joined_at, left_at,
                      is_audio_enabled, is_video_enabled, connection_quality
            "#
        );
        let query = sqlx::query_as::<_, CallParticipantRow>(&sql)
            .bind(call_id)
            .bind(user_id);
        let query = match sql_value {
            ParticipantUpdate::Flag(flag) => query.bind(flag),
            ParticipantUpdate::Text(text) => query.bind(text),
        };
        let row = query
            .fetch_optional(self.pool())
            .await
            .with_context(|| format!("failed to update call participant {column}"))?;
        row.map(CallParticipant::try_from).transpose()
    }
}

enum ParticipantUpdate {
    Flag(bool),
    Text(&'static str),
}

#[async_trait]
impl MessageRepository for PostgresChatStore {
    async fn insert_with_attachments(
        &self,
        message: NewMessage,
        attachments: Vec<NewAttachment>,
    ) -> Result<PersistOutcome> {
        let mut tx = self.begin().await?;

        let inserted = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO messages (
                client_message_id,
                conversation_id,
                sender_id,
                content,
                message_type,
                content_type,
                target_id,
                reply_to_message_id,
                status,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (client_message_id) DO NOTHING
            RETURNING id, client_message_id, conversation_id, sender_id, content,
                      message_type, content_type, target_id, reply_to_message_id,
                      status, created_at
            "#,
        )
        .bind(message.client_message_id)
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(&message.content)
        .bind(message.message_type.as_str())
        .bind(&message.content_type)
        .bind(message.target_id)
        .bind(message.reply_to_message_id)
        .bind(message.status.as_str())
        .bind(message.created_at)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to insert message")?;

        let Some(row) = inserted else {
            tx.rollback().await.context("failed to rollback message insert")?;
            let client_id = message
                .client_message_id
                .ok_or_else(|| anyhow!("message insert conflicted without idempotency key"))?;
            let existing = self
                .find_by_client_id(client_id)
                .await?
                .ok_or_else(|| anyhow!("duplicate message {client_id} vanished"))?;
            return Ok(PersistOutcome::Duplicate(existing));
        };

        let stored = Message::try_from(row)?;
        for attachment in attachments {
            sqlx::query(
                r#"
                INSERT INTO message_attachments (
                    message_id, file_name, file_url, file_type, file_size, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(stored.id)
            .bind(&attachment.file_name)
            .bind(&attachment.file_url)
            .bind(&attachment.file_type)
            .bind(attachment.file_size)
            .bind(stored.created_at)
            .execute(&mut *tx)
            .await
            .context("failed to insert message attachment")?;
        }

        tx.commit().await.context("failed to commit message insert")?;
        Ok(PersistOutcome::Inserted(stored))
    }

    async fn find_by_id(&self, message_id: i64) -> Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, client_message_id, conversation_id, sender_id, content,
                   message_type, content_type, target_id, reply_to_message_id,
                   status, created_at
            FROM messages
            WHERE id = $1
            "#,
        )
        .bind(message_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to load message")?;
        row.map(Message::try_from).transpose()
    }

    async fn find_by_client_id(&self, client_message_id: Uuid) -> Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, client_message_id, conversation_id, sender_id, content,
                   message_type, content_type, target_id, reply_to_message_id,
                   status, created_at
            FROM messages
            WHERE client_message_id = $1
            "#,
        )
        .bind(client_message_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to load message by client id")?;
        row.map(Message::try_from).transpose()
    }

    async fn attachments_of(&self, message_id: i64) -> Result<Vec<Attachment>> {
        let rows = sqlx::query_as::<_, AttachmentRow>(
            r#"
            SELECT id, message_id, file_name, file_url, file_type, file_size, created_at
            FROM message_attachments
            WHERE message_id = $1
            ORDER BY id
            "#,
        )
        .bind(message_id)
        .fetch_all(self.pool())
        .await
        .context("failed to load message attachments")?;
        Ok(rows.into_iter().map(Attachment::from).collect())
    }
}

#[async_trait]
impl ReactionRepository for PostgresChatStore {
    async fn insert_reaction(
        &self,
        message_id: i64,
        user_id: i64,
        emoji: &str,
    ) -> Result<Option<Reaction>> {
        let row = sqlx::query_as::<_, ReactionRow>(
            r#"
            INSERT INTO message_reactions (message_id, user_id, emoji, reacted_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (message_id, user_id, emoji) DO NOTHING
            RETURNING id, message_id, user_id, emoji, reacted_at
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .bind(Utc::now())
        .fetch_optional(self.pool())
        .await
        .context("failed to insert reaction")?;
        Ok(row.map(Reaction::from))
    }

    async fn delete_reaction(&self, message_id: i64, user_id: i64, emoji: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM message_reactions WHERE message_id = $1 AND user_id = $2 AND emoji = $3",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .execute(self.pool())
        .await
        .context("failed to delete reaction")?;
        Ok(result.rows_affected() > 0)
    }

    async fn reactions_of(&self, message_id: i64) -> Result<Vec<Reaction>> {
        let rows = sqlx::query_as::<_, ReactionRow>(
            r#"
            SELECT id, message_id, user_id, emoji, reacted_at
            FROM message_reactions
            WHERE message_id = $1
            ORDER BY reacted_at, id
            "#,
        )
        .bind(message_id)
        .fetch_all(self.pool())
        .await
        .context("failed to load reactions")?;
        Ok(rows.into_iter().map(Reaction::from).collect())
    }
}

#[async_trait]
impl GroupRepository for PostgresChatStore {
    async fn create_group(
        &self,
        group: NewGroup,
        permissions: Vec<(PermissionType, GroupRole)>,
    ) -> Result<Conversation> {
        let mut tx = self.begin().await?;
        let now = Utc::now();

        let row = sqlx::query_as::<_, ConversationRow>(
            r#"
            INSERT INTO conversations (
                is_group, name, description, max_members, is_public,
                require_approval, created_by, created_at
            )
            VALUES (TRUE, $1, $2, $3, $4, $5, $6, $7)
            RETURNING id, is_group, name, description, max_members, is_public,
                      require_approval, invite_link, created_by, created_at
            "#,
        )
        .bind(&group.name)
        .bind(&group.description)
        .bind(group.max_members as i32)
        .bind(group.is_public)
        .bind(group.require_approval)
        .bind(group.created_by)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert group")?;
        let conversation = Conversation::try_from(row)?;

        Self::insert_participants(&mut tx, conversation.id, &[group.created_by], GroupRole::Admin, now)
            .await?;
        Self::write_permissions(&mut tx, conversation.id, &permissions).await?;

        tx.commit().await.context("failed to commit group creation")?;
        Ok(conversation)
    }

    async fn find_group(&self, group_id: i64) -> Result<Option<Conversation>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT id, is_group, name, description, max_members, is_public,
                   require_approval, invite_link, created_by, created_at
            FROM conversations
            WHERE id = $1
            "#,
        )
        .bind(group_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to load group")?;
        row.map(Conversation::try_from).transpose()
    }

    async fn find_by_invite_code(&self, code: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT id, is_group, name, description, max_members, is_public,
                   require_approval, invite_link, created_by, created_at
            FROM conversations
            WHERE invite_link = $1
            "#,
        )
        .bind(code)
        .fetch_optional(self.pool())
        .await
        .context("failed to load group by invite code")?;
        row.map(Conversation::try_from).transpose()
    }

    async fn set_invite_code(&self, group_id: i64, code: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE conversations SET invite_link = $2 WHERE id = $1")
            .bind(group_id)
            .bind(code)
            .execute(self.pool())
            .await;
        match result {
            Ok(done) if done.rows_affected() > 0 => Ok(true),
            Ok(_) => Err(anyhow!("group {group_id} not found")),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => Ok(false),
            Err(err) => Err(err).context("failed to set invite code"),
        }
    }

    async fn member_role(&self, group_id: i64, user_id: i64) -> Result<Option<GroupRole>> {
        let role: Option<String> = sqlx::query_scalar(
            "SELECT role FROM conversation_participants WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to load member role")?;
        role.map(|r| parse_column::<GroupRole>(&r, "role")).transpose()
    }

    async fn members(&self, group_id: i64) -> Result<Vec<Participant>> {
        let rows = sqlx::query_as::<_, ParticipantRow>(
            r#"
            SELECT conversation_id, user_id, role, joined_at
            FROM conversation_participants
            WHERE conversation_id = $1
            ORDER BY joined_at, user_id
            "#,
        )
        .bind(group_id)
        .fetch_all(self.pool())
        .await
        .context("failed to load group members")?;
        convert_all(rows)
    }

    async fn member_count(&self, group_id: i64) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM conversation_participants WHERE conversation_id = $1",
        )
        .bind(group_id)
        .fetch_one(self.pool())
        .await
        .context("failed to count group members")?;
        Ok(count as u32)
    }

    async fn admin_count(&self, group_id: i64) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM conversation_participants WHERE conversation_id = $1 AND role = 'admin'",
        )
        .bind(group_id)
        .fetch_one(self.pool())
        .await
        .context("failed to count group admins")?;
        Ok(count as u32)
    }

    async fn add_members_if_capacity(
        &self,
        group_id: i64,
        user_ids: &[i64],
        role: GroupRole,
    ) -> Result<AddMembersOutcome> {
        let mut tx = self.begin().await?;

        let max: i32 =
            sqlx::query_scalar("SELECT max_members FROM conversations WHERE id = $1 FOR UPDATE")
                .bind(group_id)
                .fetch_optional(&mut *tx)
                .await
                .context("failed to lock group")?
                .ok_or_else(|| anyhow!("group {group_id} not found"))?;
        let max = to_u32(max, "max_members")?;

        let existing: Vec<i64> = sqlx::query_scalar(
            "SELECT user_id FROM conversation_participants WHERE conversation_id = $1",
        )
        .bind(group_id)
        .fetch_all(&mut *tx)
        .await
        .context("failed to load group members")?;
        let current = existing.len() as u32;

        let mut fresh: Vec<i64> = Vec::new();
        for user_id in user_ids {
            if !existing.contains(user_id) && !fresh.contains(user_id) {
                fresh.push(*user_id);
            }
        }
        if current + fresh.len() as u32 > max {
            tx.rollback().await.context("failed to rollback member insert")?;
            return Ok(AddMembersOutcome::CapacityExceeded { current, max });
        }

        let added = Self::insert_participants(&mut tx, group_id, &fresh, role, Utc::now()).await?;
        tx.commit().await.context("failed to commit member insert")?;
        Ok(AddMembersOutcome::Added(added))
    }

    async fn remove_member(&self, group_id: i64, user_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM conversation_participants WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(group_id)
        .bind(user_id)
        .execute(self.pool())
        .await
        .context("failed to remove group member")?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_role(&self, group_id: i64, user_id: i64, role: GroupRole) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE conversation_participants SET role = $3 WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(group_id)
        .bind(user_id)
        .bind(role.as_str())
        .execute(self.pool())
        .await
        .context("failed to update member role")?;
        Ok(result.rows_affected() > 0)
    }

    async fn groups_of_user(&self, user_id: i64) -> Result<Vec<i64>> {
        sqlx::query_scalar(
            "SELECT conversation_id FROM conversation_participants WHERE user_id = $1 ORDER BY conversation_id",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .context("failed to load user groups")
    }

    async fn permission(
        &self,
        group_id: i64,
        permission: PermissionType,
    ) -> Result<Option<GroupPermission>> {
        let row = sqlx::query_as::<_, PermissionRow>(
            r#"
            SELECT conversation_id, permission_type, required_role
            FROM group_permissions
            WHERE conversation_id = $1 AND permission_type = $2
            "#,
        )
        .bind(group_id)
        .bind(permission.as_str())
        .fetch_optional(self.pool())
        .await
        .context("failed to load group permission")?;
        row.map(GroupPermission::try_from).transpose()
    }

    async fn permissions(&self, group_id: i64) -> Result<Vec<GroupPermission>> {
        let rows = sqlx::query_as::<_, PermissionRow>(
            r#"
            SELECT conversation_id, permission_type, required_role
            FROM group_permissions
            WHERE conversation_id = $1
            ORDER BY permission_type
            "#,
        )
        .bind(group_id)
        .fetch_all(self.pool())
        .await
        .context("failed to load group permissions")?;
        convert_all(rows)
    }

    async fn replace_permissions(
        &self,
        group_id: i64,
        permissions: Vec<(PermissionType, GroupRole)>,
    ) -> Result<()> {
        let mut tx = self.begin().await?;
        sqlx::query("DELETE FROM group_permissions WHERE conversation_id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await
            .context("failed to clear group permissions")?;
        Self::write_permissions(&mut tx, group_id, &permissions).await?;
        tx.commit().await.context("failed to commit group permissions")?;
        Ok(())
    }
}

#[async_trait]
impl JoinRequestRepository for PostgresChatStore {
    async fn create_join_request(
        &self,
        group_id: i64,
        user_id: i64,
        message: Option<String>,
    ) -> Result<Option<JoinRequest>> {
        let row = sqlx::query_as::<_, JoinRequestRow>(
            r#"
            INSERT INTO group_join_requests (conversation_id, user_id, message, status, created_at)
            VALUES ($1, $2, $3, 'pending', $4)
            ON CONFLICT DO NOTHING
            RETURNING id, conversation_id, user_id, message, status, created_at,
                      reviewed_by, reviewed_at
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .bind(&message)
        .bind(Utc::now())
        .fetch_optional(self.pool())
        .await
        .context("failed to create join request")?;
        row.map(JoinRequest::try_from).transpose()
    }

    async fn find_join_request(&self, request_id: i64) -> Result<Option<JoinRequest>> {
        let row = sqlx::query_as::<_, JoinRequestRow>(
            r#"
            SELECT id, conversation_id, user_id, message, status, created_at,
                   reviewed_by, reviewed_at
            FROM group_join_requests
            WHERE id = $1
            "#,
        )
        .bind(request_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to load join request")?;
        row.map(JoinRequest::try_from).transpose()
    }

    async fn pending_requests(&self, group_id: i64) -> Result<Vec<JoinRequest>> {
        let rows = sqlx::query_as::<_, JoinRequestRow>(
            r#"
            SELECT id, conversation_id, user_id, message, status, created_at,
                   reviewed_by, reviewed_at
            FROM group_join_requests
            WHERE conversation_id = $1 AND status = 'pending'
            ORDER BY created_at
            "#,
        )
        .bind(group_id)
        .fetch_all(self.pool())
        .await
        .context("failed to load pending join requests")?;
        convert_all(rows)
    }

    async fn resolve_join_request(
        &self,
        request_id: i64,
        status: JoinRequestStatus,
        reviewed_by: i64,
        reviewed_at: DateTime<Utc>,
    ) -> Result<Option<JoinRequest>> {
        let row = sqlx::query_as::<_, JoinRequestRow>(
            r#"
            UPDATE group_join_requests
            SET status = $2, reviewed_by = $3, reviewed_at = $4
            WHERE id = $1 AND status = 'pending'
            RETURNING id, conversation_id, user_id, message, status, created_at,
                      reviewed_by, reviewed_at
            "#,
        )
        .bind(request_id)
        .bind(status.as_str())
        .bind(reviewed_by)
        .bind(reviewed_at)
        .fetch_optional(self.pool())
        .await
        .context("failed to resolve join request")?;
        row.map(JoinRequest::try_from).transpose()
    }
}

#[async_trait]
impl CallRepository for PostgresChatStore {
    async fn insert_call(
        &self,
        call: &GroupCall,
        initiator: NewCallParticipant,
    ) -> Result<Option<CallParticipant>> {
        let mut tx = self.begin().await?;

        let created = sqlx::query(
            r#"
            INSERT INTO group_calls (
                id, group_id, initiator_id, call_type, status,
                max_participants, started_at, ended_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&call.id)
        .bind(call.group_id)
        .bind(call.initiator_id)
        .bind(call.call_type.as_str())
        .bind(call.status.as_str())
        .bind(call.max_participants as i32)
        .bind(call.started_at)
        .bind(call.ended_at)
        .execute(&mut *tx)
        .await
        .context("failed to insert group call")?;

        if created.rows_affected() == 0 {
            tx.rollback().await.context("failed to rollback call insert")?;
            return Ok(None);
        }

        let row = sqlx::query_as::<_, CallParticipantRow>(
            r#"
            INSERT INTO call_participants (
                call_id, user_id, joined_at, is_audio_enabled, is_video_enabled, connection_quality
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, call_id, user_id, joined_at, left_at,
                      is_audio_enabled, is_video_enabled, connection_quality
            "#,
        )
        .bind(&initiator.call_id)
        .bind(initiator.user_id)
        .bind(initiator.joined_at)
        .bind(initiator.is_audio_enabled)
        .bind(initiator.is_video_enabled)
        .bind(ConnectionQuality::default().as_str())
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert call initiator")?;

        tx.commit().await.context("failed to commit call insert")?;
        Ok(Some(row.try_into()?))
    }

    async fn find_call(&self, call_id: &str) -> Result<Option<GroupCall>> {
        let row = sqlx::query_as::<_, CallRow>(
            r#"
            SELECT id, group_id, initiator_id, call_type, status,
                   max_participants, started_at, ended_at
            FROM group_calls
            WHERE id = $1
            "#,
        )
        .bind(call_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to load group call")?;
        row.map(GroupCall::try_from).transpose()
    }

    async fn active_call_for_group(&self, group_id: i64) -> Result<Option<GroupCall>> {
        let row = sqlx::query_as::<_, CallRow>(
            r#"
            SELECT id, group_id, initiator_id, call_type, status,
                   max_participants, started_at, ended_at
            FROM group_calls
            WHERE group_id = $1 AND status = 'active'
            "#,
        )
        .bind(group_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to load active group call")?;
        row.map(GroupCall::try_from).transpose()
    }

    async fn join_call(&self, participant: NewCallParticipant) -> Result<JoinOutcome> {
        let mut tx = self.begin().await?;

        let locked: Option<(String, i32)> = sqlx::query_as(
            "SELECT status, max_participants FROM group_calls WHERE id = $1 FOR UPDATE",
        )
        .bind(&participant.call_id)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to lock group call")?;

        let max = match locked {
            Some((status, max)) if status == CallStatus::Active.as_str() => {
                to_u32(max, "max_participants")?
            }
            _ => {
                tx.rollback().await.context("failed to rollback call join")?;
                return Ok(JoinOutcome::NotActive);
            }
        };

        let already: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM call_participants WHERE call_id = $1 AND user_id = $2 AND left_at IS NULL",
        )
        .bind(&participant.call_id)
        .bind(participant.user_id)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to check call participant")?;
        if already.is_some() {
            tx.rollback().await.context("failed to rollback call join")?;
            return Ok(JoinOutcome::AlreadyInCall);
        }

        if Self::count_open_participants(&mut tx, &participant.call_id).await? >= max {
            tx.rollback().await.context("failed to rollback call join")?;
            return Ok(JoinOutcome::Full);
        }

        let row = sqlx::query_as::<_, CallParticipantRow>(
            r#"
            INSERT INTO call_participants (
                call_id, user_id, joined_at, is_audio_enabled, is_video_enabled, connection_quality
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, call_id, user_id, joined_at, left_at,
                      is_audio_enabled, is_video_enabled, connection_quality
            "#,
        )
        .bind(&participant.call_id)
        .bind(participant.user_id)
        .bind(participant.joined_at)
        .bind(participant.is_audio_enabled)
        .bind(participant.is_video_enabled)
        .bind(ConnectionQuality::default().as_str())
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert call participant")?;

        tx.commit().await.context("failed to commit call join")?;
        Ok(JoinOutcome::Joined(row.try_into()?))
    }

    async fn leave_call(
        &self,
        call_id: &str,
        user_id: i64,
        left_at: DateTime<Utc>,
    ) -> Result<Option<LeaveOutcome>> {
        let mut tx = self.begin().await?;

        sqlx::query("SELECT id FROM group_calls WHERE id = $1 FOR UPDATE")
            .bind(call_id)
            .execute(&mut *tx)
            .await
            .context("failed to lock group call")?;

        let row = sqlx::query_as::<_, CallParticipantRow>(
            r#"
            UPDATE call_participants SET left_at = $3
            WHERE call_id = $1 AND user_id = $2 AND left_at IS NULL
            RETURNING id, call_id, user_id, joined_at, left_at,
                      is_audio_enabled, is_video_enabled, connection_quality
            "#,
        )
        .bind(call_id)
        .bind(user_id)
        .bind(left_at)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to close call participant")?;

        let Some(row) = row else {
            tx.rollback().await.context("failed to rollback call leave")?;
            return Ok(None);
        };

        let remaining = Self::count_open_participants(&mut tx, call_id).await?;
        tx.commit().await.context("failed to commit call leave")?;
        Ok(Some(LeaveOutcome {
            participant: row.try_into()?,
            remaining,
        }))
    }

    async fn end_call_if_active(
        &self,
        call_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<Vec<i64>>> {
        let mut tx = self.begin().await?;

        let ended = sqlx::query(
            "UPDATE group_calls SET status = 'ended', ended_at = $2 WHERE id = $1 AND status = 'active'",
        )
        .bind(call_id)
        .bind(ended_at)
        .execute(&mut *tx)
        .await
        .context("failed to end group call")?;

        if ended.rows_affected() == 0 {
            tx.rollback().await.context("failed to rollback call end")?;
            return Ok(None);
        }

        let closed: Vec<i64> = sqlx::query_scalar(
            r#"
            UPDATE call_participants SET left_at = $2
            WHERE call_id = $1 AND left_at IS NULL
            RETURNING user_id
            "#,
        )
        .bind(call_id)
        .bind(ended_at)
        .fetch_all(&mut *tx)
        .await
        .context("failed to close call participants")?;

        tx.commit().await.context("failed to commit call end")?;
        Ok(Some(closed))
    }

    async fn open_participant(
        &self,
        call_id: &str,
        user_id: i64,
    ) -> Result<Option<CallParticipant>> {
        let row = sqlx::query_as::<_, CallParticipantRow>(
            r#"
            SELECT id, call_id, user_id, joined_at, left_at,
                   is_audio_enabled, is_video_enabled, connection_quality
            FROM call_participants
            WHERE call_id = $1 AND user_id = $2 AND left_at IS NULL
            "#,
        )
        .bind(call_id)
        .bind(user_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to load call participant")?;
        row.map(CallParticipant::try_from).transpose()
    }

    async fn participants(&self, call_id: &str, active_only: bool) -> Result<Vec<CallParticipant>> {
        let rows = sqlx::query_as::<_, CallParticipantRow>(
            r#"
            SELECT id, call_id, user_id, joined_at, left_at,
                   is_audio_enabled, is_video_enabled, connection_quality
            FROM call_participants
            WHERE call_id = $1 AND ($2 = FALSE OR left_at IS NULL)
            ORDER BY joined_at, id
            "#,
        )
        .bind(call_id)
        .bind(active_only)
        .fetch_all(self.pool())
        .await
        .context("failed to load call participants")?;
        convert_all(rows)
    }

    async fn update_media(
        &self,
        call_id: &str,
        user_id: i64,
        media: MediaType,
        enabled: bool,
    ) -> Result<Option<CallParticipant>> {
        let column = match media {
            MediaType::Audio => "is_audio_enabled",
            MediaType::Video => "is_video_enabled",
        };
        self.update_open_participant(call_id, user_id, column, ParticipantUpdate::Flag(enabled))
            .await
    }

    async fn update_quality(
        &self,
        call_id: &str,
        user_id: i64,
        quality: ConnectionQuality,
    ) -> Result<Option<CallParticipant>> {
        self.update_open_participant(
            call_id,
            user_id,
            "connection_quality",
            ParticipantUpdate::Text(quality.as_str()),
        )
        .await
    }

    async fn call_history(&self, group_id: i64, offset: u32, limit: u32) -> Result<Vec<GroupCall>> {
        let rows = sqlx::query_as::<_, CallRow>(
            r#"
            SELECT id, group_id, initiator_id, call_type, status,
                   max_participants, started_at, ended_at
            FROM group_calls
            WHERE group_id = $1
            ORDER BY started_at DESC
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(group_id)
        .bind(i64::from(offset))
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .context("failed to load call history")?;
        convert_all(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_convert_into_entities() {
        let row = CallParticipantRow {
            id: 1,
            call_id: "c1".into(),
            user_id: 9,
            joined_at: Utc::now(),
            left_at: None,
            is_audio_enabled: true,
            is_video_enabled: false,
            connection_quality: "poor".into(),
        };
        let participant = CallParticipant::try_from(row).unwrap();
        assert!(participant.is_active());
        assert_eq!(participant.connection_quality, ConnectionQuality::Poor);

        let bad = ConversationRow {
            id: 1,
            is_group: true,
            name: None,
            description: None,
            max_members: -1,
            is_public: false,
            require_approval: false,
            invite_link: None,
            created_by: None,
            created_at: Utc::now(),
        };
        assert!(Conversation::try_from(bad).is_err());
    }

    #[test]
    fn unknown_role_is_rejected() {
        let row = ParticipantRow {
            conversation_id: 1,
            user_id: 2,
            role: "owner".into(),
            joined_at: Utc::now(),
        };
        assert!(Participant::try_from(row).is_err());
    }
}
