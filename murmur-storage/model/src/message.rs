//! 消息、附件、表情反应实体

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ParseEnumError;

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    #[serde(alias = "public")]
    Public,
    #[serde(alias = "private")]
    Private,
    #[serde(alias = "group")]
    Group,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Public => "PUBLIC",
            MessageType::Private => "PRIVATE",
            MessageType::Group => "GROUP",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PUBLIC" => Ok(MessageType::Public),
            "PRIVATE" => Ok(MessageType::Private),
            "GROUP" => Ok(MessageType::Group),
            _ => Err(ParseEnumError::new("message_type", s)),
        }
    }
}

/// 消息状态（持久化后仅状态可变）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MessageStatus {
    Sending,
    #[default]
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sending => "Sending",
            MessageStatus::Sent => "Sent",
            MessageStatus::Delivered => "Delivered",
            MessageStatus::Read => "Read",
            MessageStatus::Failed => "Failed",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sending" => Ok(MessageStatus::Sending),
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            "failed" => Ok(MessageStatus::Failed),
            _ => Err(ParseEnumError::new("message_status", s)),
        }
    }
}

/// 已持久化的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub message_type: MessageType,
    pub content_type: String,
    pub target_id: Option<i64>,
    pub reply_to_message_id: Option<i64>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    /// 发布端生成的幂等键
    pub client_message_id: Option<Uuid>,
}

/// 待写入的消息（id 由存储分配）
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub client_message_id: Option<Uuid>,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub message_type: MessageType,
    pub content_type: String,
    pub target_id: Option<i64>,
    pub reply_to_message_id: Option<i64>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    pub fn into_message(self, id: i64) -> Message {
        Message {
            id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            content: self.content,
            message_type: self.message_type,
            content_type: self.content_type,
            target_id: self.target_id,
            reply_to_message_id: self.reply_to_message_id,
            status: self.status,
            created_at: self.created_at,
            client_message_id: self.client_message_id,
        }
    }
}

/// 附件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub message_id: i64,
    pub file_name: String,
    pub file_url: String,
    pub file_type: String,
    pub file_size: i64,
    pub created_at: DateTime<Utc>,
}

/// 附件元数据（随消息一起发布）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAttachment {
    pub file_name: String,
    pub file_url: String,
    pub file_type: String,
    #[serde(default)]
    pub file_size: i64,
}

impl NewAttachment {
    pub fn is_image(&self) -> bool {
        self.file_type.starts_with("image/")
    }
}

/// 表情反应：(message_id, user_id, emoji) 唯一
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub id: i64,
    pub message_id: i64,
    pub user_id: i64,
    pub emoji: String,
    pub reacted_at: DateTime<Utc>,
}

/// 消息写入结果
#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    /// 新写入
    Inserted(Message),
    /// 幂等键已存在，返回已存消息
    Duplicate(Message),
}

impl PersistOutcome {
    pub fn message(&self) -> &Message {
        match self {
            PersistOutcome::Inserted(m) | PersistOutcome::Duplicate(m) => m,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            PersistOutcome::Inserted(m) | PersistOutcome::Duplicate(m) => m,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, PersistOutcome::Duplicate(_))
    }
}
