//! Murmur IM Core 错误工具模块
//!
//! - 统一的错误码与错误类型，供各服务共享
//! - 区分业务拒绝（调用方可以据此调整输入）与基础设施故障（系统暂不可用）

use std::fmt;

use thiserror::Error;

/// 错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// 参数非法
    InvalidParameter,
    /// 资源不存在
    NotFound,
    /// 权限不足 / 非成员
    PermissionDenied,
    /// 状态冲突（如群内已有进行中的通话）
    Conflict,
    /// 容量已满
    CapacityExceeded,
    /// 最后一个管理员保护
    LastAdmin,
    /// 服务不可用（消息代理不可达等）
    ServiceUnavailable,
    /// 存储失败
    StorageFailure,
    /// 内部错误
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::CapacityExceeded => "CAPACITY_EXCEEDED",
            ErrorCode::LastAdmin => "LAST_ADMIN",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::StorageFailure => "STORAGE_FAILURE",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 对外展示的通用故障文案
pub const GENERIC_FAILURE_MESSAGE: &str = "Service temporarily unavailable, please retry later";

/// 聊天后端统一错误类型
#[derive(Debug, Error)]
pub enum ChatError {
    /// 校验错误（发布前即被拒绝）
    #[error("Invalid parameter: {0}")]
    Validation(String),

    /// 业务规则拒绝
    #[error("{reason}")]
    Denied { code: ErrorCode, reason: String },

    /// 消息代理错误
    #[error("Broker error: {0}")]
    Transport(String),

    /// 存储错误
    #[error("Storage error: {0}")]
    Storage(String),

    /// 其他错误
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// 统一结果类型
pub type ChatResult<T> = Result<T, ChatError>;

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        ChatError::Validation(message.into())
    }

    pub fn denied(code: ErrorCode, reason: impl Into<String>) -> Self {
        ChatError::Denied {
            code,
            reason: reason.into(),
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::denied(ErrorCode::NotFound, reason)
    }

    pub fn permission_denied(reason: impl Into<String>) -> Self {
        Self::denied(ErrorCode::PermissionDenied, reason)
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::denied(ErrorCode::Conflict, reason)
    }

    /// 将存储层错误包装为 `ChatError::Storage`
    pub fn storage(err: impl fmt::Display) -> Self {
        ChatError::Storage(err.to_string())
    }

    /// 将代理层错误包装为 `ChatError::Transport`
    pub fn transport(err: impl fmt::Display) -> Self {
        ChatError::Transport(err.to_string())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ChatError::Validation(_) => ErrorCode::InvalidParameter,
            ChatError::Denied { code, .. } => *code,
            ChatError::Transport(_) => ErrorCode::ServiceUnavailable,
            ChatError::Storage(_) => ErrorCode::StorageFailure,
            ChatError::Other(_) => ErrorCode::Internal,
        }
    }

    /// 是否为业务拒绝（包含校验错误）
    pub fn is_business_denial(&self) -> bool {
        matches!(self, ChatError::Validation(_) | ChatError::Denied { .. })
    }

    /// 面向调用方的文案：业务拒绝返回具体原因，基础设施故障返回通用文案
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Validation(message) => message.clone(),
            ChatError::Denied { reason, .. } => reason.clone(),
            _ => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }
}

/// 便捷扩展：将 `anyhow::Result` 映射为存储错误
pub trait StorageResultExt<T> {
    fn into_storage(self) -> ChatResult<T>;
}

impl<T> StorageResultExt<T> for anyhow::Result<T> {
    fn into_storage(self) -> ChatResult<T> {
        self.map_err(|err| ChatError::Storage(format!("{err:#}")))
    }
}
