use std::sync::Arc;

use murmur_im_core::ChatResult;
use murmur_storage_model::{CallParticipantView, GroupCallView};
use tracing::debug;

use crate::application::commands::{
    CallAnswerCommand, CallOfferCommand, IceCandidateCommand, JoinCallCommand,
    RelaySignalCommand, StartCallCommand, ToggleMediaCommand, UpdateQualityCommand,
};
use crate::domain::model::LeaveSummary;
use crate::domain::service::{DirectCallRelay, GroupCallSessionManager};

/// 通话控制命令处理器（实时通道与 HTTP 入口共用）
pub struct CallCommandHandler {
    sessions: Arc<GroupCallSessionManager>,
    direct: Arc<DirectCallRelay>,
}

impl CallCommandHandler {
    pub fn new(sessions: Arc<GroupCallSessionManager>, direct: Arc<DirectCallRelay>) -> Self {
        Self { sessions, direct }
    }

    pub async fn handle_start_call(&self, command: StartCallCommand) -> ChatResult<GroupCallView> {
        debug!(group_id = command.group_id, user_id = command.user_id, "Handling start call command");
        self.sessions
            .start_call(
                command.group_id,
                command.user_id,
                command.call_type,
                command.max_participants,
            )
            .await
    }

    pub async fn handle_join_call(&self, command: JoinCallCommand) -> ChatResult<GroupCallView> {
        debug!(call_id = %command.call_id, user_id = command.user_id, "Handling join call command");
        self.sessions
            .join_call(
                &command.call_id,
                command.user_id,
                command.audio_enabled,
                command.video_enabled,
            )
            .await
    }

    pub async fn handle_leave_call(&self, call_id: &str, user_id: i64) -> ChatResult<LeaveSummary> {
        self.sessions.leave_call(call_id, user_id).await
    }

    pub async fn handle_end_call(&self, call_id: &str, user_id: i64) -> ChatResult<()> {
        self.sessions.end_call(call_id, user_id).await
    }

    pub async fn handle_toggle_media(
        &self,
        command: ToggleMediaCommand,
    ) -> ChatResult<CallParticipantView> {
        self.sessions
            .toggle_media(
                &command.call_id,
                command.user_id,
                command.media_type,
                command.enabled,
            )
            .await
    }

    pub async fn handle_update_quality(
        &self,
        command: UpdateQualityCommand,
    ) -> ChatResult<CallParticipantView> {
        self.sessions
            .update_connection_quality(&command.call_id, command.user_id, command.quality)
            .await
    }

    /// 处理信令转发命令
    pub async fn handle_relay_signal(&self, command: RelaySignalCommand) -> ChatResult<()> {
        self.sessions
            .relay_signal(
                &command.call_id,
                command.from_user_id,
                command.target_user_id,
                command.kind,
                command.data,
            )
            .await
    }

    pub fn handle_call_offer(&self, command: CallOfferCommand) -> ChatResult<()> {
        self.direct.send_offer(
            command.from_user_id,
            command.target_user_id,
            &command.offer,
            command.call_type.as_deref(),
        )
    }

    pub fn handle_call_answer(&self, command: CallAnswerCommand) -> ChatResult<()> {
        self.direct
            .send_answer(command.from_user_id, command.target_user_id, &command.answer)
    }

    pub fn handle_ice_candidate(&self, command: IceCandidateCommand) -> ChatResult<()> {
        self.direct.send_ice_candidate(
            command.from_user_id,
            command.target_user_id,
            &command.candidate,
        )
    }

    pub fn handle_hang_up(&self, from_user_id: i64, target_user_id: i64) -> ChatResult<()> {
        self.direct.end_call(from_user_id, target_user_id)
    }
}
