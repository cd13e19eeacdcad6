use chrono::Utc;
use murmur_im_core::{ChatError, ChatResult, RoutingKey};
use murmur_storage_model::{MessageStatus, MessageType, NewAttachment, OutboundMessage};
use serde::Deserialize;
use uuid::Uuid;

pub const MAX_CONTENT_CHARS: usize = 4000;
pub const MAX_ATTACHMENTS: usize = 10;

/// 客户端发送请求
#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    pub sender_id: i64,
    #[serde(default)]
    pub conversation_id: i64,
    pub message_type: MessageType,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub target_id: Option<i64>,
    #[serde(default)]
    pub reply_to_message_id: Option<i64>,
    #[serde(default)]
    pub attachments: Vec<NewAttachment>,
}

/// 通过校验、可以发布的消息
#[derive(Debug, Clone)]
pub struct MessageSubmission {
    pub routing_key: RoutingKey,
    pub envelope: OutboundMessage,
}

impl MessageSubmission {
    pub fn prepare(request: SendMessageRequest) -> ChatResult<Self> {
        if request.sender_id <= 0 {
            return Err(ChatError::validation("sender_id is required"));
        }

        let routing_key = match request.message_type {
            MessageType::Private => match request.target_id {
                Some(target) if target > 0 => RoutingKey::Private(target),
                _ => {
                    return Err(ChatError::validation(
                        "target_id is required for private messages",
                    ));
                }
            },
            MessageType::Group if request.conversation_id > 0 => {
                RoutingKey::Group(request.conversation_id)
            }
            MessageType::Group => {
                return Err(ChatError::validation(
                    "conversation_id is required for group messages",
                ));
            }
            MessageType::Public => RoutingKey::Public,
        };

        let content = request.content.trim().to_string();
        if content.is_empty() && request.attachments.is_empty() {
            return Err(ChatError::validation(
                "content is required when no attachments are present",
            ));
        }
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(ChatError::validation(format!(
                "content exceeds {MAX_CONTENT_CHARS} characters"
            )));
        }
        if request.attachments.len() > MAX_ATTACHMENTS {
            return Err(ChatError::validation(format!(
                "at most {MAX_ATTACHMENTS} attachments are allowed"
            )));
        }

        let content_type = content_type_for(&request.attachments).to_string();
        let envelope = OutboundMessage {
            client_message_id: Some(Uuid::new_v4()),
            conversation_id: request.conversation_id,
            sender_id: request.sender_id,
            content,
            message_type: request.message_type,
            content_type,
            target_id: request.target_id,
            reply_to_message_id: request.reply_to_message_id,
            status: MessageStatus::Sent,
            created_at: Utc::now(),
            attachments: request.attachments,
        };

        Ok(Self {
            routing_key,
            envelope,
        })
    }
}

/// 由首个附件推导内容类型
pub fn content_type_for(attachments: &[NewAttachment]) -> &'static str {
    match attachments.first() {
        None => "text",
        Some(first) if first.is_image() => "image",
        Some(_) => "file",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(message_type: MessageType) -> SendMessageRequest {
        SendMessageRequest {
            sender_id: 1,
            conversation_id: 7,
            message_type,
            content: "hello".into(),
            target_id: None,
            reply_to_message_id: None,
            attachments: Vec::new(),
        }
    }

    fn attachment(file_type: &str) -> NewAttachment {
        NewAttachment {
            file_name: "f".into(),
            file_url: "https://cdn/f".into(),
            file_type: file_type.into(),
            file_size: 1,
        }
    }

    #[test]
    fn routing_key_follows_message_type() {
        let group = MessageSubmission::prepare(request(MessageType::Group)).unwrap();
        assert_eq!(group.routing_key.to_string(), "chat.group.7");

        let mut private = request(MessageType::Private);
        private.target_id = Some(42);
        let private = MessageSubmission::prepare(private).unwrap();
        assert_eq!(private.routing_key.to_string(), "chat.private.42");

        let public = MessageSubmission::prepare(request(MessageType::Public)).unwrap();
        assert_eq!(public.routing_key.to_string(), "chat.public.all");
        assert!(public.envelope.client_message_id.is_some());
    }

    #[test]
    fn rejects_invalid_requests() {
        let mut missing_sender = request(MessageType::Group);
        missing_sender.sender_id = 0;
        assert!(matches!(
            MessageSubmission::prepare(missing_sender),
            Err(ChatError::Validation(_))
        ));

        assert!(MessageSubmission::prepare(request(MessageType::Private)).is_err());

        let mut no_conversation = request(MessageType::Group);
        no_conversation.conversation_id = 0;
        assert!(MessageSubmission::prepare(no_conversation).is_err());

        let mut empty = request(MessageType::Group);
        empty.content = "   ".into();
        assert!(MessageSubmission::prepare(empty).is_err());

        let mut too_long = request(MessageType::Group);
        too_long.content = "a".repeat(MAX_CONTENT_CHARS + 1);
        assert!(MessageSubmission::prepare(too_long).is_err());

        let mut too_many = request(MessageType::Group);
        too_many.attachments = (0..=MAX_ATTACHMENTS).map(|_| attachment("text/plain")).collect();
        assert!(MessageSubmission::prepare(too_many).is_err());
    }

    #[test]
    fn attachments_drive_content_type() {
        let mut with_image = request(MessageType::Group);
        with_image.content.clear();
        with_image.attachments = vec![attachment("image/png"), attachment("application/pdf")];
        let submission = MessageSubmission::prepare(with_image).unwrap();
        assert_eq!(submission.envelope.content_type, "image");

        assert_eq!(content_type_for(&[attachment("application/pdf")]), "file");
        assert_eq!(content_type_for(&[]), "text");
    }
}
