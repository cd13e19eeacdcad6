use anyhow::{Result, anyhow};
use murmur_im_core::{MurmurAppConfig, PostgresInstanceConfig, env_override, resolve};
use murmur_push::DEFAULT_FANOUT_QUEUE_CAPACITY;

/// 未指定时的最大参与人数
pub const DEFAULT_MAX_PARTICIPANTS: u32 = 10;
/// 允许设置的最大参与人数上限
pub const MAX_PARTICIPANTS_LIMIT: u32 = 50;

/// 群通话服务运行时配置
///
/// 环境变量（`MURMUR_CALL_*`）优先于配置文件。
#[derive(Clone, Debug)]
pub struct CallConfig {
    pub default_max_participants: u32,
    pub max_participants_limit: u32,
    pub postgres: Option<PostgresInstanceConfig>,
    pub fanout_queue_capacity: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            default_max_participants: DEFAULT_MAX_PARTICIPANTS,
            max_participants_limit: MAX_PARTICIPANTS_LIMIT,
            postgres: None,
            fanout_queue_capacity: DEFAULT_FANOUT_QUEUE_CAPACITY,
        }
    }
}

impl CallConfig {
    pub fn from_app_config(app: &MurmurAppConfig) -> Result<Self> {
        let service = app.call_service();

        let max_participants_limit = resolve(
            "MURMUR_CALL_MAX_PARTICIPANTS_LIMIT",
            service.max_participants_limit,
            MAX_PARTICIPANTS_LIMIT,
        );
        let default_max_participants = resolve(
            "MURMUR_CALL_DEFAULT_MAX_PARTICIPANTS",
            service.default_max_participants,
            DEFAULT_MAX_PARTICIPANTS,
        );
        if max_participants_limit == 0 {
            return Err(anyhow!("call max_participants_limit must be positive"));
        }
        if default_max_participants == 0 || default_max_participants > max_participants_limit {
            return Err(anyhow!(
                "call default_max_participants must be between 1 and {max_participants_limit}"
            ));
        }

        let mut postgres = service
            .postgres
            .as_deref()
            .and_then(|name| app.postgres_profile(name))
            .cloned();
        if let Some(url) = env_override::<String>("MURMUR_CALL_POSTGRES_URL") {
            postgres.get_or_insert_with(PostgresInstanceConfig::default).url = url;
        }

        Ok(Self {
            default_max_participants,
            max_participants_limit,
            postgres,
            fanout_queue_capacity: app
                .push_service()
                .fanout_queue_capacity
                .unwrap_or(DEFAULT_FANOUT_QUEUE_CAPACITY),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_im_core::config::parse_config;

    #[test]
    fn defaults_apply_without_section() {
        let app = parse_config("").unwrap();
        let config = CallConfig::from_app_config(&app).unwrap();
        assert_eq!(config.default_max_participants, 10);
        assert_eq!(config.max_participants_limit, 50);
        assert!(config.postgres.is_none());
    }

    #[test]
    fn reads_service_section() {
        let app = parse_config(
            r#"
            [postgres.calls]
            url = "postgres://calls@db/chat"

            [services.call]
            default_max_participants = 6
            max_participants_limit = 12
            postgres = "calls"
            "#,
        )
        .unwrap();
        let config = CallConfig::from_app_config(&app).unwrap();
        assert_eq!(config.default_max_participants, 6);
        assert_eq!(config.max_participants_limit, 12);
        assert_eq!(config.postgres.unwrap().url, "postgres://calls@db/chat");
    }

    #[test]
    fn default_above_limit_is_rejected() {
        let app = parse_config(
            r#"
            [services.call]
            default_max_participants = 20
            max_participants_limit = 8
            "#,
        )
        .unwrap();
        assert!(CallConfig::from_app_config(&app).is_err());
    }
}
