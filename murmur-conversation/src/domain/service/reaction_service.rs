//! 消息表情反应

use std::sync::Arc;

use murmur_im_core::{ChatError, ChatResult, StorageResultExt};
use murmur_push::{ChatNotifier, PushEvent};
use murmur_storage_model::{MessageRepository, Reaction, ReactionRepository};
use serde_json::json;
use tracing::{debug, info};

/// 单个表情的最大字符数
pub const MAX_EMOJI_CHARS: usize = 32;

pub struct ReactionService {
    messages: Arc<dyn MessageRepository>,
    reactions: Arc<dyn ReactionRepository>,
    notifier: ChatNotifier,
}

impl ReactionService {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        reactions: Arc<dyn ReactionRepository>,
        notifier: ChatNotifier,
    ) -> Self {
        Self {
            messages,
            reactions,
            notifier,
        }
    }

    /// 添加反应；同一用户对同一消息的同一表情只能有一条
    pub async fn add_reaction(&self, message_id: i64, user_id: i64, emoji: &str) -> ChatResult<Reaction> {
        let emoji = normalize_emoji(emoji)?;
        self.messages
            .find_by_id(message_id)
            .await
            .into_storage()?
            .ok_or_else(|| ChatError::not_found("Message not found"))?;

        let reaction = self
            .reactions
            .insert_reaction(message_id, user_id, emoji)
            .await
            .into_storage()?
            .ok_or_else(|| ChatError::conflict("User has already reacted with this emoji"))?;

        self.notifier.notify_all(
            PushEvent::ReceiveReaction,
            json!({ "message_id": message_id, "reaction": reaction }),
        );
        info!(message_id, user_id, emoji, "reaction added");
        Ok(reaction)
    }

    /// 移除反应；不存在时返回 NotFound 拒绝
    pub async fn remove_reaction(&self, message_id: i64, user_id: i64, emoji: &str) -> ChatResult<()> {
        let emoji = normalize_emoji(emoji)?;
        let removed = self
            .reactions
            .delete_reaction(message_id, user_id, emoji)
            .await
            .into_storage()?;
        if !removed {
            debug!(message_id, user_id, emoji, "reaction to remove not found");
            return Err(ChatError::not_found("Reaction not found"));
        }

        self.notifier.notify_all(
            PushEvent::RemoveReaction,
            json!({ "message_id": message_id, "user_id": user_id, "emoji": emoji }),
        );
        info!(message_id, user_id, emoji, "reaction removed");
        Ok(())
    }

    pub async fn reactions_of(&self, message_id: i64) -> ChatResult<Vec<Reaction>> {
        self.reactions.reactions_of(message_id).await.into_storage()
    }
}

fn normalize_emoji(emoji: &str) -> ChatResult<&str> {
    let emoji = emoji.trim();
    if emoji.is_empty() {
        return Err(ChatError::validation("emoji is required"));
    }
    if emoji.chars().count() > MAX_EMOJI_CHARS {
        return Err(ChatError::validation(format!(
            "emoji exceeds {MAX_EMOJI_CHARS} characters"
        )));
    }
    Ok(emoji)
}
