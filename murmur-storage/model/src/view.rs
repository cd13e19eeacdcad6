//! 推送给客户端的响应视图

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::call::{CallParticipant, CallType, ConnectionQuality, GroupCall};
use crate::message::{Attachment, Message, MessageStatus, MessageType, Reaction};

/// 消息视图：附件、被回复消息（递归）与当前表情反应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub message_type: MessageType,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<Reaction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replied_message: Option<Box<MessageView>>,
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content.clone(),
            message_type: message.message_type,
            content_type: message.content_type.clone(),
            created_at: message.created_at,
            status: message.status,
            target_id: message.target_id,
            reply_to_message_id: message.reply_to_message_id,
            attachments: Vec::new(),
            reactions: Vec::new(),
            replied_message: None,
        }
    }
}

/// 通话参与者视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallParticipantView {
    pub id: i64,
    pub user_id: i64,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub is_audio_enabled: bool,
    pub is_video_enabled: bool,
    pub connection_quality: ConnectionQuality,
    pub is_active: bool,
}

impl From<&CallParticipant> for CallParticipantView {
    fn from(p: &CallParticipant) -> Self {
        Self {
            id: p.id,
            user_id: p.user_id,
            joined_at: p.joined_at,
            left_at: p.left_at,
            is_audio_enabled: p.is_audio_enabled,
            is_video_enabled: p.is_video_enabled,
            connection_quality: p.connection_quality,
            is_active: p.is_active(),
        }
    }
}

/// 群通话视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCallView {
    pub id: String,
    pub group_id: i64,
    pub initiator_id: i64,
    pub call_type: CallType,
    pub status: crate::call::CallStatus,
    pub max_participants: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub active_participants_count: u32,
    pub participants: Vec<CallParticipantView>,
}

impl GroupCallView {
    pub fn new(call: &GroupCall, participants: &[CallParticipant]) -> Self {
        let participants: Vec<CallParticipantView> =
            participants.iter().map(CallParticipantView::from).collect();
        let active = participants.iter().filter(|p| p.is_active).count() as u32;
        Self {
            id: call.id.clone(),
            group_id: call.group_id,
            initiator_id: call.initiator_id,
            call_type: call.call_type,
            status: call.status,
            max_participants: call.max_participants,
            started_at: call.started_at,
            ended_at: call.ended_at,
            active_participants_count: active,
            participants,
        }
    }
}
