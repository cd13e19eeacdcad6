//! 一对一通话信令转发
//!
//! 不落库也不维护会话状态，SDP / ICE 原样推送给目标用户的所有连接。

use murmur_im_core::{ChatError, ChatResult};
use murmur_push::{ChatNotifier, PushEvent};
use murmur_storage_model::CallType;
use serde_json::json;
use tracing::{debug, info};

pub struct DirectCallRelay {
    notifier: ChatNotifier,
}

impl DirectCallRelay {
    pub fn new(notifier: ChatNotifier) -> Self {
        Self { notifier }
    }

    /// 发起呼叫；无法识别的通话类型按视频处理
    pub fn send_offer(
        &self,
        from_user_id: i64,
        target_user_id: i64,
        offer: &str,
        call_type: Option<&str>,
    ) -> ChatResult<()> {
        require_target(target_user_id)?;
        require_body("Offer", offer)?;
        let call_type = call_type
            .and_then(|raw| raw.trim().parse::<CallType>().ok())
            .unwrap_or(CallType::Video);

        self.notifier.notify_user(
            PushEvent::ReceiveCallOffer,
            target_user_id,
            json!({
                "from_user_id": from_user_id,
                "offer": offer,
                "call_type": call_type,
            }),
        );
        info!(from_user_id, target_user_id, call_type = %call_type, "call offer relayed");
        Ok(())
    }

    pub fn send_answer(&self, from_user_id: i64, target_user_id: i64, answer: &str) -> ChatResult<()> {
        require_target(target_user_id)?;
        require_body("Answer", answer)?;
        self.notifier.notify_user(
            PushEvent::ReceiveCallAnswer,
            target_user_id,
            json!({ "from_user_id": from_user_id, "answer": answer }),
        );
        info!(from_user_id, target_user_id, "call answer relayed");
        Ok(())
    }

    pub fn send_ice_candidate(
        &self,
        from_user_id: i64,
        target_user_id: i64,
        candidate: &str,
    ) -> ChatResult<()> {
        require_target(target_user_id)?;
        self.notifier.notify_user(
            PushEvent::ReceiveIceCandidate,
            target_user_id,
            json!({ "from_user_id": from_user_id, "candidate": candidate }),
        );
        debug!(from_user_id, target_user_id, "ice candidate relayed");
        Ok(())
    }

    /// 挂断：通知对端
    pub fn end_call(&self, from_user_id: i64, target_user_id: i64) -> ChatResult<()> {
        require_target(target_user_id)?;
        self.notifier.notify_user(
            PushEvent::CallEnded,
            target_user_id,
            json!({ "from_user_id": from_user_id }),
        );
        info!(from_user_id, target_user_id, "direct call ended");
        Ok(())
    }
}

fn require_target(target_user_id: i64) -> ChatResult<()> {
    if target_user_id <= 0 {
        return Err(ChatError::validation("Target user ID cannot be empty"));
    }
    Ok(())
}

fn require_body(name: &str, body: &str) -> ChatResult<()> {
    if body.trim().is_empty() {
        return Err(ChatError::validation(format!("{name} cannot be empty")));
    }
    Ok(())
}
