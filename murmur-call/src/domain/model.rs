use murmur_push::PushEvent;
use murmur_storage_model::CallParticipantView;
use serde::{Deserialize, Serialize};

/// 最后一人离开时的结束原因
pub const REASON_NO_ACTIVE_PARTICIPANTS: &str = "no active participants";
/// 参与者主动离开
pub const REASON_USER_LEFT: &str = "user left";

/// 显式结束的原因文本
pub fn ended_by_user(user_id: i64) -> String {
    format!("ended by user {user_id}")
}

/// 历史查询默认与最大分页大小
pub const DEFAULT_HISTORY_LIMIT: u32 = 20;
pub const MAX_HISTORY_LIMIT: u32 = 100;

/// 信令类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice_candidate",
        }
    }

    /// 推送给目标用户的事件
    pub fn event(&self) -> PushEvent {
        match self {
            SignalKind::Offer => PushEvent::ReceiveGroupCallOffer,
            SignalKind::Answer => PushEvent::ReceiveGroupCallAnswer,
            SignalKind::IceCandidate => PushEvent::ReceiveGroupIceCandidate,
        }
    }
}

/// 离开通话的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaveSummary {
    pub participant: CallParticipantView,
    /// 本次离开是否触发了通话结束
    pub call_ended: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_kinds_map_to_events() {
        let kind: SignalKind = serde_json::from_str("\"ice_candidate\"").unwrap();
        assert_eq!(kind, SignalKind::IceCandidate);
        assert_eq!(kind.event(), PushEvent::ReceiveGroupIceCandidate);
        assert_eq!(SignalKind::Offer.event(), PushEvent::ReceiveGroupCallOffer);
        assert_eq!(ended_by_user(4), "ended by user 4");
    }
}
