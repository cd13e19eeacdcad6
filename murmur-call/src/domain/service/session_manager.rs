//! 群通话会话管理
//!
//! 状态机：Active → Ended（终态）。
//! 同一通话上的 join / leave / end 按通话 ID 串行执行；
//! 开始通话按群 ID 串行执行，保证每个群最多一个进行中的通话。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use murmur_im_core::metrics::CallMetrics;
use murmur_im_core::{ChatError, ChatResult, ErrorCode, KeyedLocks, StorageResultExt};
use murmur_push::{ChatNotifier, PushEvent};
use murmur_storage_model::{
    CallParticipant, CallParticipantView, CallRepository, CallStatus, CallType,
    ConnectionQuality, GroupCall, GroupCallView, GroupRepository, GroupRole, JoinOutcome,
    MediaType, NewCallParticipant,
};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::CallConfig;
use crate::domain::model::{
    DEFAULT_HISTORY_LIMIT, LeaveSummary, MAX_HISTORY_LIMIT, REASON_NO_ACTIVE_PARTICIPANTS,
    REASON_USER_LEFT, SignalKind, ended_by_user,
};

pub struct GroupCallSessionManager {
    calls: Arc<dyn CallRepository>,
    groups: Arc<dyn GroupRepository>,
    notifier: ChatNotifier,
    default_max_participants: u32,
    max_participants_limit: u32,
    call_locks: KeyedLocks<String>,
    group_locks: KeyedLocks<i64>,
    metrics: &'static CallMetrics,
}

impl GroupCallSessionManager {
    pub fn new(
        calls: Arc<dyn CallRepository>,
        groups: Arc<dyn GroupRepository>,
        notifier: ChatNotifier,
        config: &CallConfig,
    ) -> Self {
        Self {
            calls,
            groups,
            notifier,
            default_max_participants: config.default_max_participants,
            max_participants_limit: config.max_participants_limit,
            call_locks: KeyedLocks::new(),
            group_locks: KeyedLocks::new(),
            metrics: CallMetrics::global(),
        }
    }

    /// 发起群通话，发起人自动加入
    #[instrument(skip(self))]
    pub async fn start_call(
        &self,
        group_id: i64,
        user_id: i64,
        call_type: CallType,
        max_participants: Option<u32>,
    ) -> ChatResult<GroupCallView> {
        let result = self
            .start_call_inner(group_id, user_id, call_type, max_participants)
            .await;
        self.metrics.record("start", result.is_ok());
        result
    }

    async fn start_call_inner(
        &self,
        group_id: i64,
        user_id: i64,
        call_type: CallType,
        max_participants: Option<u32>,
    ) -> ChatResult<GroupCallView> {
        let max_participants = max_participants.unwrap_or(self.default_max_participants);
        if !(1..=self.max_participants_limit).contains(&max_participants) {
            return Err(ChatError::validation(format!(
                "Max participants must be between 1 and {}",
                self.max_participants_limit
            )));
        }
        self.require_member(group_id, user_id).await?;

        let _guard = self.group_locks.lock(group_id).await;
        let now = Utc::now();
        let call = GroupCall {
            id: Uuid::new_v4().to_string(),
            group_id,
            initiator_id: user_id,
            call_type,
            status: CallStatus::Active,
            max_participants,
            started_at: now,
            ended_at: None,
        };
        let initiator = NewCallParticipant {
            call_id: call.id.clone(),
            user_id,
            joined_at: now,
            is_audio_enabled: true,
            is_video_enabled: call_type == CallType::Video,
        };

        let participant = self
            .calls
            .insert_call(&call, initiator)
            .await
            .into_storage()?
            .ok_or_else(|| ChatError::conflict("Group already has an active call"))?;
        self.metrics.active_calls.inc();

        self.notifier.join_call_room(user_id, &call.id).await;
        let view = GroupCallView::new(&call, &[participant]);
        self.notifier.notify_group(
            PushEvent::GroupCallStarted,
            group_id,
            json!({ "group_id": group_id, "call": view }),
        );
        info!(call_id = %call.id, group_id, user_id, call_type = %call_type, "group call started");
        Ok(view)
    }

    /// 加入进行中的通话；容量检查与写入在同一临界区内完成
    #[instrument(skip(self))]
    pub async fn join_call(
        &self,
        call_id: &str,
        user_id: i64,
        audio_enabled: bool,
        video_enabled: bool,
    ) -> ChatResult<GroupCallView> {
        let result = self
            .join_call_inner(call_id, user_id, audio_enabled, video_enabled)
            .await;
        self.metrics.record("join", result.is_ok());
        result
    }

    async fn join_call_inner(
        &self,
        call_id: &str,
        user_id: i64,
        audio_enabled: bool,
        video_enabled: bool,
    ) -> ChatResult<GroupCallView> {
        let _guard = self.call_locks.lock(call_id.to_string()).await;
        let call = self.active_call(call_id).await?;
        self.require_member(call.group_id, user_id).await?;

        let outcome = self
            .calls
            .join_call(NewCallParticipant {
                call_id: call.id.clone(),
                user_id,
                joined_at: Utc::now(),
                is_audio_enabled: audio_enabled,
                is_video_enabled: video_enabled,
            })
            .await
            .into_storage()?;
        let participant = match outcome {
            JoinOutcome::Joined(participant) => participant,
            JoinOutcome::AlreadyInCall => {
                return Err(ChatError::conflict("User is already in the call"));
            }
            JoinOutcome::Full => {
                return Err(ChatError::denied(
                    ErrorCode::CapacityExceeded,
                    "Call has reached maximum participants",
                ));
            }
            JoinOutcome::NotActive => return Err(ChatError::conflict("Call is not active")),
        };

        self.notifier.join_call_room(user_id, &call.id).await;
        self.notifier.notify_group(
            PushEvent::GroupCallParticipantJoined,
            call.group_id,
            json!({
                "group_id": call.group_id,
                "call_id": call.id,
                "participant": CallParticipantView::from(&participant),
            }),
        );
        info!(call_id = %call.id, user_id, "participant joined call");

        let participants = self.calls.participants(&call.id, true).await.into_storage()?;
        Ok(GroupCallView::new(&call, &participants))
    }

    /// 离开通话；最后一名参与者离开时通话自动结束
    #[instrument(skip(self))]
    pub async fn leave_call(&self, call_id: &str, user_id: i64) -> ChatResult<LeaveSummary> {
        let result = self.leave_call_inner(call_id, user_id).await;
        self.metrics.record("leave", result.is_ok());
        if matches!(&result, Ok(summary) if summary.call_ended) {
            self.call_locks.forget(&call_id.to_string());
        }
        result
    }

    async fn leave_call_inner(&self, call_id: &str, user_id: i64) -> ChatResult<LeaveSummary> {
        let _guard = self.call_locks.lock(call_id.to_string()).await;
        let call = self.find_call(call_id).await?;

        let now = Utc::now();
        let outcome = self
            .calls
            .leave_call(call_id, user_id, now)
            .await
            .into_storage()?
            .ok_or_else(|| ChatError::not_found("User is not in the call"))?;

        self.notifier.leave_call_room(user_id, call_id).await;
        self.notifier.notify_group(
            PushEvent::GroupCallParticipantLeft,
            call.group_id,
            json!({
                "group_id": call.group_id,
                "call_id": call_id,
                "user_id": user_id,
                "reason": REASON_USER_LEFT,
            }),
        );
        info!(call_id, user_id, remaining = outcome.remaining, "participant left call");

        let mut call_ended = false;
        if outcome.remaining == 0 {
            call_ended = self
                .finish(&call, Utc::now(), REASON_NO_ACTIVE_PARTICIPANTS)
                .await?;
        }

        Ok(LeaveSummary {
            participant: CallParticipantView::from(&outcome.participant),
            call_ended,
        })
    }

    /// 显式结束通话：发起人或群管理员/版主
    #[instrument(skip(self))]
    pub async fn end_call(&self, call_id: &str, user_id: i64) -> ChatResult<()> {
        let result = self.end_call_inner(call_id, user_id).await;
        self.metrics.record("end", result.is_ok());
        if result.is_ok() {
            self.call_locks.forget(&call_id.to_string());
        }
        result
    }

    async fn end_call_inner(&self, call_id: &str, user_id: i64) -> ChatResult<()> {
        let _guard = self.call_locks.lock(call_id.to_string()).await;
        let call = self.active_call(call_id).await?;

        if call.initiator_id != user_id {
            let role = self
                .groups
                .member_role(call.group_id, user_id)
                .await
                .into_storage()?;
            if !matches!(role, Some(GroupRole::Admin | GroupRole::Moderator)) {
                return Err(ChatError::permission_denied(
                    "Only the call initiator or group admins and moderators can end the call",
                ));
            }
        }

        let ended = self.finish(&call, Utc::now(), &ended_by_user(user_id)).await?;
        if !ended {
            return Err(ChatError::conflict("Call is not active"));
        }
        Ok(())
    }

    /// Active → Ended 比较并设置；已结束时返回 false，不重复广播
    async fn finish(
        &self,
        call: &GroupCall,
        ended_at: DateTime<Utc>,
        reason: &str,
    ) -> ChatResult<bool> {
        let Some(closed) = self
            .calls
            .end_call_if_active(&call.id, ended_at)
            .await
            .into_storage()?
        else {
            debug!(call_id = %call.id, "call already ended");
            return Ok(false);
        };

        self.metrics.active_calls.dec();
        for participant in &closed {
            self.notifier.leave_call_room(*participant, &call.id).await;
        }
        self.notifier.notify_group(
            PushEvent::GroupCallEnded,
            call.group_id,
            json!({ "group_id": call.group_id, "call_id": call.id, "reason": reason }),
        );
        info!(call_id = %call.id, group_id = call.group_id, reason, closed = closed.len(), "group call ended");
        Ok(true)
    }

    /// 切换音视频
    pub async fn toggle_media(
        &self,
        call_id: &str,
        user_id: i64,
        media: MediaType,
        enabled: bool,
    ) -> ChatResult<CallParticipantView> {
        let result = self.toggle_media_inner(call_id, user_id, media, enabled).await;
        self.metrics.record("toggle_media", result.is_ok());
        result
    }

    async fn toggle_media_inner(
        &self,
        call_id: &str,
        user_id: i64,
        media: MediaType,
        enabled: bool,
    ) -> ChatResult<CallParticipantView> {
        let _guard = self.call_locks.lock(call_id.to_string()).await;
        let call = self.active_call(call_id).await?;
        let participant = self
            .calls
            .update_media(call_id, user_id, media, enabled)
            .await
            .into_storage()?
            .ok_or_else(|| ChatError::not_found("User is not in the call"))?;

        self.notifier.notify_group(
            PushEvent::GroupCallMediaToggled,
            call.group_id,
            json!({
                "group_id": call.group_id,
                "call_id": call_id,
                "user_id": user_id,
                "media_type": media,
                "enabled": enabled,
            }),
        );
        debug!(call_id, user_id, media = %media, enabled, "media toggled");
        Ok(CallParticipantView::from(&participant))
    }

    /// 上报连接质量
    pub async fn update_connection_quality(
        &self,
        call_id: &str,
        user_id: i64,
        quality: ConnectionQuality,
    ) -> ChatResult<CallParticipantView> {
        let result = self.update_quality_inner(call_id, user_id, quality).await;
        self.metrics.record("update_quality", result.is_ok());
        result
    }

    async fn update_quality_inner(
        &self,
        call_id: &str,
        user_id: i64,
        quality: ConnectionQuality,
    ) -> ChatResult<CallParticipantView> {
        let _guard = self.call_locks.lock(call_id.to_string()).await;
        let call = self.active_call(call_id).await?;
        let participant = self
            .calls
            .update_quality(call_id, user_id, quality)
            .await
            .into_storage()?
            .ok_or_else(|| ChatError::not_found("User is not in the call"))?;

        self.notifier.notify_group(
            PushEvent::GroupCallConnectionQualityUpdated,
            call.group_id,
            json!({
                "group_id": call.group_id,
                "call_id": call_id,
                "user_id": user_id,
                "quality": quality,
            }),
        );
        Ok(CallParticipantView::from(&participant))
    }

    /// 在通话参与者之间转发 WebRTC 信令
    pub async fn relay_signal(
        &self,
        call_id: &str,
        from_user_id: i64,
        target_user_id: i64,
        kind: SignalKind,
        data: Value,
    ) -> ChatResult<()> {
        self.active_call(call_id).await?;
        if self.open_participant(call_id, from_user_id).await?.is_none() {
            return Err(ChatError::permission_denied("You are not in this call"));
        }
        if self.open_participant(call_id, target_user_id).await?.is_none() {
            return Err(ChatError::not_found("Target user is not in the call"));
        }

        self.notifier.notify_user(
            kind.event(),
            target_user_id,
            json!({ "call_id": call_id, "from_user_id": from_user_id, "data": data }),
        );
        debug!(call_id, from_user_id, target_user_id, kind = kind.as_str(), "signal relayed");
        Ok(())
    }

    /// 群内进行中的通话
    pub async fn get_active_call(
        &self,
        group_id: i64,
        requester_id: i64,
    ) -> ChatResult<Option<GroupCallView>> {
        self.require_member(group_id, requester_id).await?;
        let Some(call) = self
            .calls
            .active_call_for_group(group_id)
            .await
            .into_storage()?
        else {
            return Ok(None);
        };
        let participants = self.calls.participants(&call.id, true).await.into_storage()?;
        Ok(Some(GroupCallView::new(&call, &participants)))
    }

    /// 通话参与者（含已离开的记录）
    pub async fn get_call_participants(
        &self,
        call_id: &str,
        requester_id: i64,
    ) -> ChatResult<Vec<CallParticipantView>> {
        let call = self.find_call(call_id).await?;
        self.require_member(call.group_id, requester_id).await?;
        let participants = self.calls.participants(call_id, false).await.into_storage()?;
        Ok(participants.iter().map(CallParticipantView::from).collect())
    }

    /// 历史通话，page 从 1 开始
    pub async fn get_call_history(
        &self,
        group_id: i64,
        requester_id: i64,
        page: u32,
        limit: Option<u32>,
    ) -> ChatResult<Vec<GroupCallView>> {
        self.require_member(group_id, requester_id).await?;
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
        let offset = page.max(1).saturating_sub(1).saturating_mul(limit);

        let calls = self
            .calls
            .call_history(group_id, offset, limit)
            .await
            .into_storage()?;
        let mut views = Vec::with_capacity(calls.len());
        for call in calls {
            let participants = self.calls.participants(&call.id, false).await.into_storage()?;
            views.push(GroupCallView::new(&call, &participants));
        }
        Ok(views)
    }

    async fn require_member(&self, group_id: i64, user_id: i64) -> ChatResult<GroupRole> {
        self.groups
            .member_role(group_id, user_id)
            .await
            .into_storage()?
            .ok_or_else(|| ChatError::permission_denied("You are not a member of this group"))
    }

    async fn find_call(&self, call_id: &str) -> ChatResult<GroupCall> {
        self.calls
            .find_call(call_id)
            .await
            .into_storage()?
            .ok_or_else(|| ChatError::not_found("Call not found"))
    }

    async fn active_call(&self, call_id: &str) -> ChatResult<GroupCall> {
        let call = self.find_call(call_id).await?;
        if !call.is_active() {
            warn!(call_id, "operation on ended call rejected");
            return Err(ChatError::conflict("Call is not active"));
        }
        Ok(call)
    }

    async fn open_participant(
        &self,
        call_id: &str,
        user_id: i64,
    ) -> ChatResult<Option<CallParticipant>> {
        self.calls
            .open_participant(call_id, user_id)
            .await
            .into_storage()
    }
}
