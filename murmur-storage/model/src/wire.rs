//! 代理上传输的消息信封（JSON）

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{MessageStatus, MessageType, NewAttachment, NewMessage};

/// 发布端生成、消费端持久化的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// 幂等键；旧格式消息可能缺失
    #[serde(default)]
    pub client_message_id: Option<Uuid>,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub message_type: MessageType,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub target_id: Option<i64>,
    #[serde(default)]
    pub reply_to_message_id: Option<i64>,
    #[serde(default)]
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<NewAttachment>,
}

fn default_content_type() -> String {
    "text".to_string()
}

impl OutboundMessage {
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// 拆分为待写入的消息与附件
    pub fn into_parts(self) -> (NewMessage, Vec<NewAttachment>) {
        let message = NewMessage {
            client_message_id: self.client_message_id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            content: self.content,
            message_type: self.message_type,
            content_type: self.content_type,
            target_id: self.target_id,
            reply_to_message_id: self.reply_to_message_id,
            status: self.status,
            created_at: self.created_at,
        };
        (message, self.attachments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_minimal_envelope_with_defaults() {
        let raw = br#"{
            "conversation_id": 7,
            "sender_id": 1,
            "content": "hello",
            "message_type": "GROUP",
            "created_at": "2024-05-01T10:00:00Z"
        }"#;
        let envelope = OutboundMessage::from_bytes(raw).unwrap();
        assert_eq!(envelope.message_type, MessageType::Group);
        assert_eq!(envelope.content_type, "text");
        assert_eq!(envelope.status, MessageStatus::Sent);
        assert!(envelope.client_message_id.is_none());
        assert!(envelope.attachments.is_empty());

        let (message, attachments) = envelope.into_parts();
        assert_eq!(message.conversation_id, 7);
        assert!(attachments.is_empty());
    }

    #[test]
    fn rejects_unknown_message_type() {
        let raw = br#"{
            "conversation_id": 7,
            "sender_id": 1,
            "content": "hello",
            "message_type": "BROADCAST",
            "created_at": "2024-05-01T10:00:00Z"
        }"#;
        assert!(OutboundMessage::from_bytes(raw).is_err());
    }
}
