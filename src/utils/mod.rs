//! 工具函数模块
//!
//! 环境变量覆盖、日志截断、按键加锁和服务启动辅助函数

pub mod helpers;
pub mod keyed_lock;

pub use helpers::ServiceHelper;
pub use keyed_lock::KeyedLocks;

use std::env;
use std::str::FromStr;

/// 读取并解析环境变量，未设置或解析失败时返回 None
///
/// ```
/// use murmur_im_core::utils::env_override;
///
/// let value: Option<u32> = env_override("MURMUR_UNSET_FOR_DOCTEST");
/// assert!(value.is_none());
/// ```
pub fn env_override<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// 环境变量优先，其次配置文件，最后默认值
pub fn resolve<T: FromStr>(key: &str, from_file: Option<T>, default: T) -> T {
    env_override(key).or(from_file).unwrap_or(default)
}

/// 日志中截断过长的文本
pub fn truncate_for_log(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_prefers_env_then_file_then_default() {
        // SAFETY: 仅在本测试中设置唯一命名的变量
        unsafe {
            env::set_var("MURMUR_UTILS_TEST_WORKERS", "3");
        }
        assert_eq!(resolve("MURMUR_UTILS_TEST_WORKERS", Some(5usize), 8), 3);
        unsafe {
            env::remove_var("MURMUR_UTILS_TEST_WORKERS");
        }
        assert_eq!(resolve("MURMUR_UTILS_TEST_WORKERS", Some(5usize), 8), 5);
        assert_eq!(resolve::<usize>("MURMUR_UTILS_TEST_WORKERS", None, 8), 8);
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate_for_log("hello", 10), "hello");
        assert_eq!(truncate_for_log("你好世界", 2), "你好…");
    }
}
