use murmur_storage_model::{CallType, ConnectionQuality, MediaType};
use serde::Deserialize;
use serde_json::Value;

use crate::domain::model::SignalKind;

/// 发起通话命令
#[derive(Debug, Clone, Deserialize)]
pub struct StartCallCommand {
    pub group_id: i64,
    pub user_id: i64,
    pub call_type: CallType,
    #[serde(default)]
    pub max_participants: Option<u32>,
}

/// 加入通话命令
#[derive(Debug, Clone, Deserialize)]
pub struct JoinCallCommand {
    pub call_id: String,
    pub user_id: i64,
    #[serde(default = "enabled")]
    pub audio_enabled: bool,
    #[serde(default)]
    pub video_enabled: bool,
}

/// 切换媒体命令
#[derive(Debug, Clone, Deserialize)]
pub struct ToggleMediaCommand {
    pub call_id: String,
    pub user_id: i64,
    pub media_type: MediaType,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateQualityCommand {
    pub call_id: String,
    pub user_id: i64,
    pub quality: ConnectionQuality,
}

/// 信令转发命令
#[derive(Debug, Clone, Deserialize)]
pub struct RelaySignalCommand {
    pub call_id: String,
    pub from_user_id: i64,
    pub target_user_id: i64,
    pub kind: SignalKind,
    #[serde(default)]
    pub data: Value,
}

/// 一对一呼叫
#[derive(Debug, Clone, Deserialize)]
pub struct CallOfferCommand {
    pub from_user_id: i64,
    pub target_user_id: i64,
    pub offer: String,
    #[serde(default)]
    pub call_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallAnswerCommand {
    pub from_user_id: i64,
    pub target_user_id: i64,
    pub answer: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IceCandidateCommand {
    pub from_user_id: i64,
    pub target_user_id: i64,
    pub candidate: String,
}

fn enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_defaults_to_audio_only() {
        let command: JoinCallCommand =
            serde_json::from_str(r#"{"call_id":"c1","user_id":2}"#).unwrap();
        assert!(command.audio_enabled);
        assert!(!command.video_enabled);
    }

    #[test]
    fn commands_accept_lowercase_enums() {
        let command: StartCallCommand =
            serde_json::from_str(r#"{"group_id":7,"user_id":1,"call_type":"video"}"#).unwrap();
        assert_eq!(command.call_type, CallType::Video);
        assert_eq!(command.max_participants, None);

        let command: RelaySignalCommand = serde_json::from_str(
            r#"{"call_id":"c1","from_user_id":1,"target_user_id":2,"kind":"ice_candidate","data":{"candidate":"x"}}"#,
        )
        .unwrap();
        assert_eq!(command.kind, SignalKind::IceCandidate);
        assert_eq!(command.data["candidate"], "x");
    }
}
