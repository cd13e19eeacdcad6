//! 群通话与通话参与者

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ParseEnumError;

macro_rules! lowercase_enum {
    ($(#[$meta:meta])* $name:ident, $field:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(ParseEnumError::new($field, s)),
                }
            }
        }
    };
}

lowercase_enum!(
    /// 通话类型
    CallType, "call_type", { Audio => "audio", Video => "video" }
);

lowercase_enum!(
    /// 通话状态：Active → Ended（终态）
    CallStatus, "call_status", { Active => "active", Ended => "ended" }
);

lowercase_enum!(
    /// 媒体类型
    MediaType, "media_type", { Audio => "audio", Video => "video" }
);

lowercase_enum!(
    /// 连接质量
    ConnectionQuality, "connection_quality", {
        Excellent => "excellent",
        Good => "good",
        Poor => "poor",
        Disconnected => "disconnected",
    }
);

impl Default for ConnectionQuality {
    fn default() -> Self {
        ConnectionQuality::Good
    }
}

/// 群通话；同一群组同时最多一个 Active
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCall {
    pub id: String,
    pub group_id: i64,
    pub initiator_id: i64,
    pub call_type: CallType,
    pub status: CallStatus,
    pub max_participants: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl GroupCall {
    pub fn is_active(&self) -> bool {
        self.status == CallStatus::Active
    }
}

/// 通话参与记录；left_at 为空表示仍在通话中，记录只追加不删除
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallParticipant {
    pub id: i64,
    pub call_id: String,
    pub user_id: i64,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub is_audio_enabled: bool,
    pub is_video_enabled: bool,
    pub connection_quality: ConnectionQuality,
}

impl CallParticipant {
    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
}

/// 待写入的参与记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCallParticipant {
    pub call_id: String,
    pub user_id: i64,
    pub joined_at: DateTime<Utc>,
    pub is_audio_enabled: bool,
    pub is_video_enabled: bool,
}

impl NewCallParticipant {
    pub fn into_participant(self, id: i64) -> CallParticipant {
        CallParticipant {
            id,
            call_id: self.call_id,
            user_id: self.user_id,
            joined_at: self.joined_at,
            left_at: None,
            is_audio_enabled: self.is_audio_enabled,
            is_video_enabled: self.is_video_enabled,
            connection_quality: ConnectionQuality::default(),
        }
    }
}

/// 加入通话结果（容量检查与插入原子执行）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined(CallParticipant),
    AlreadyInCall,
    Full,
    NotActive,
}

/// 离开通话结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub participant: CallParticipant,
    /// 离开后仍在通话中的人数
    pub remaining: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lowercase_values() {
        assert_eq!("Video".parse::<CallType>().unwrap(), CallType::Video);
        assert_eq!("poor".parse::<ConnectionQuality>().unwrap(), ConnectionQuality::Poor);
        assert!("screen".parse::<MediaType>().is_err());
        assert_eq!(ConnectionQuality::default(), ConnectionQuality::Good);
        assert_eq!(CallStatus::Ended.to_string(), "ended");
    }
}
