//! 路由键与绑定模式
//!
//! 路由键语法：`chat.<public|private|group>.<id>`，public 使用固定后缀 `all`。

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const PREFIX: &str = "chat";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingKeyError {
    #[error("routing key must start with `chat.`: {0}")]
    BadPrefix(String),
    #[error("unknown routing category in {0}")]
    UnknownCategory(String),
    #[error("invalid target id in {0}")]
    InvalidId(String),
}

/// 路由键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingKey {
    /// 私聊：目标用户
    Private(i64),
    /// 群聊：会话 ID
    Group(i64),
    /// 公共频道
    Public,
}

/// 推送受众
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Audience {
    User(i64),
    Group(i64),
    Everyone,
}

impl RoutingKey {
    pub fn audience(&self) -> Audience {
        match self {
            RoutingKey::Private(user_id) => Audience::User(*user_id),
            RoutingKey::Group(group_id) => Audience::Group(*group_id),
            RoutingKey::Public => Audience::Everyone,
        }
    }

    /// 指标标签
    pub fn category(&self) -> &'static str {
        match self {
            RoutingKey::Private(_) => "private",
            RoutingKey::Group(_) => "group",
            RoutingKey::Public => "public",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, RoutingKeyError> {
        let mut parts = raw.split('.');
        if parts.next() != Some(PREFIX) {
            return Err(RoutingKeyError::BadPrefix(raw.to_string()));
        }
        let category = parts.next();
        let id = parts.next();
        if parts.next().is_some() {
            return Err(RoutingKeyError::InvalidId(raw.to_string()));
        }

        match (category, id) {
            (Some("public"), None) | (Some("public"), Some("all")) => Ok(RoutingKey::Public),
            (Some("private"), Some(id)) => parse_id(raw, id).map(RoutingKey::Private),
            (Some("group"), Some(id)) => parse_id(raw, id).map(RoutingKey::Group),
            (Some("private"), None) | (Some("group"), None) => {
                Err(RoutingKeyError::InvalidId(raw.to_string()))
            }
            _ => Err(RoutingKeyError::UnknownCategory(raw.to_string())),
        }
    }
}

fn parse_id(raw: &str, id: &str) -> Result<i64, RoutingKeyError> {
    id.parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| RoutingKeyError::InvalidId(raw.to_string()))
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingKey::Private(id) => write!(f, "{PREFIX}.private.{id}"),
            RoutingKey::Group(id) => write!(f, "{PREFIX}.group.{id}"),
            RoutingKey::Public => write!(f, "{PREFIX}.public.all"),
        }
    }
}

impl FromStr for RoutingKey {
    type Err = RoutingKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoutingKey::parse(s)
    }
}

/// topic 交换机绑定模式：`*` 匹配一个词，`#` 匹配零个或多个词
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingPattern {
    raw: String,
    words: Vec<String>,
}

impl BindingPattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            raw: pattern.to_string(),
            words: pattern.split('.').map(str::to_string).collect(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, routing_key: &str) -> bool {
        let key: Vec<&str> = routing_key.split('.').collect();
        let pattern: Vec<&str> = self.words.iter().map(String::as_str).collect();
        match_words(&pattern, &key)
    }
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && match_words(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && match_words(rest, &key[1..]),
    }
}

impl fmt::Display for BindingPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_grammar() {
        assert_eq!(RoutingKey::Private(42).to_string(), "chat.private.42");
        assert_eq!(RoutingKey::Group(7).to_string(), "chat.group.7");
        assert_eq!(RoutingKey::Public.to_string(), "chat.public.all");
    }

    #[test]
    fn parses_into_audience() {
        assert_eq!(
            RoutingKey::parse("chat.private.42").unwrap().audience(),
            Audience::User(42)
        );
        assert_eq!(
            RoutingKey::parse("chat.group.7").unwrap().audience(),
            Audience::Group(7)
        );
        assert_eq!(
            RoutingKey::parse("chat.public.all").unwrap().audience(),
            Audience::Everyone
        );
        assert_eq!("chat.public".parse::<RoutingKey>().unwrap(), RoutingKey::Public);
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(matches!(
            RoutingKey::parse("mail.group.7"),
            Err(RoutingKeyError::BadPrefix(_))
        ));
        assert!(matches!(
            RoutingKey::parse("chat.channel.7"),
            Err(RoutingKeyError::UnknownCategory(_))
        ));
        assert!(matches!(
            RoutingKey::parse("chat.group.abc"),
            Err(RoutingKeyError::InvalidId(_))
        ));
        assert!(matches!(
            RoutingKey::parse("chat.private"),
            Err(RoutingKeyError::InvalidId(_))
        ));
        assert!(RoutingKey::parse("chat.group.7.extra").is_err());
    }

    #[test]
    fn binding_pattern_topic_semantics() {
        let all = BindingPattern::new("chat.#");
        assert!(all.matches("chat.private.42"));
        assert!(all.matches("chat.public.all"));
        assert!(all.matches("chat"));
        assert!(!all.matches("presence.user.1"));

        let groups = BindingPattern::new("chat.group.*");
        assert!(groups.matches("chat.group.7"));
        assert!(!groups.matches("chat.group"));
        assert!(!groups.matches("chat.group.7.x"));
        assert!(!groups.matches("chat.private.7"));

        let middle = BindingPattern::new("chat.#.all");
        assert!(middle.matches("chat.public.all"));
        assert!(middle.matches("chat.all"));
        assert!(!middle.matches("chat.public.some"));
    }
}
