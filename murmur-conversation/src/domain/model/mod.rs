use murmur_storage_model::{Conversation, JoinRequest, Participant};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// 群人数上限的允许范围
pub const MIN_GROUP_CAPACITY: u32 = 2;
pub const MAX_GROUP_CAPACITY: u32 = 1000;

/// 邀请码长度与字符集
pub const INVITE_CODE_LEN: usize = 8;
const INVITE_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
/// 邀请码冲突时的最大重试次数
pub const INVITE_CODE_ATTEMPTS: usize = 10;

/// 群组详情：基础信息 + 成员列表
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupDetails {
    pub group: Conversation,
    pub members: Vec<Participant>,
    pub member_count: u32,
}

impl GroupDetails {
    pub fn new(group: Conversation, members: Vec<Participant>) -> Self {
        let member_count = members.len() as u32;
        Self {
            group,
            members,
            member_count,
        }
    }
}

/// 入群申请审批结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinDecision {
    Approve,
    Reject,
}

impl JoinDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinDecision::Approve => "approve",
            JoinDecision::Reject => "reject",
        }
    }
}

/// 通过邀请链接加入的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteJoinOutcome {
    /// 直接成为成员
    Joined { group_id: i64, member: Participant },
    /// 群组需要审批，已创建申请
    Pending(JoinRequest),
}

/// 生成邀请码：8 位 A-Z0-9
pub fn generate_invite_code() -> String {
    let mut rng = rand::thread_rng();
    (0..INVITE_CODE_LEN)
        .map(|_| INVITE_CODE_CHARSET[rng.gen_range(0..INVITE_CODE_CHARSET.len())] as char)
        .collect()
}
