//! 配置管理器 - 负责处理不同环境下的配置选择和覆盖
//!
//! - 根据 MURMUR_ENV 选择环境
//! - 加载 config/environments/{environment}.toml 并合并到基础配置

use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use toml::Value;

use super::{MurmurAppConfig, merge_value};

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取当前环境名称
    ///
    /// 从环境变量 MURMUR_ENV 获取，未设置时默认为 "development"
    pub fn get_environment() -> String {
        env::var("MURMUR_ENV").unwrap_or_else(|_| "development".to_string())
    }

    /// 根据环境加载特定配置
    ///
    /// 加载 config/environments/{environment}.toml 文件中的配置，
    /// 并将其合并到基础配置中
    pub fn load_environment_config(base_config: &mut MurmurAppConfig) -> Result<()> {
        let env = Self::get_environment();
        let env_config_path = format!("config/environments/{}.toml", env);
        Self::apply_overlay_file(base_config, Path::new(&env_config_path))
    }

    /// 将一个 TOML 覆盖文件合并进已有配置（文件不存在时忽略）
    pub fn apply_overlay_file(base_config: &mut MurmurAppConfig, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("无法读取环境配置文件: {}", path.display()))?;
        let overlay: Value = toml::from_str(&content)
            .with_context(|| format!("无效的环境配置格式: {}", path.display()))?;

        Self::apply_overlay(base_config, overlay)
    }

    /// 合并覆盖值：基础配置转回 TOML 表，合并后整体反序列化
    pub fn apply_overlay(base_config: &mut MurmurAppConfig, overlay: Value) -> Result<()> {
        let mut merged =
            Value::try_from(&*base_config).context("unable to serialise base configuration")?;
        merge_value(&mut merged, overlay);
        *base_config = merged
            .try_into()
            .context("invalid configuration after environment overlay")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn overlay_replaces_only_named_fields() {
        let mut cfg = parse_config(
            r#"
            [logging]
            level = "info"

            [postgres.main]
            url = "postgres://localhost/murmur"

            [services.storage_writer]
            postgres = "main"
            worker_concurrency = 8
            "#,
        )
        .unwrap();

        let overlay: Value = toml::from_str(
            r#"
            [logging]
            level = "warn"

            [services.storage_writer]
            worker_concurrency = 2
            "#,
        )
        .unwrap();

        ConfigManager::apply_overlay(&mut cfg, overlay).unwrap();

        assert_eq!(cfg.logging.level, "warn");
        let writer = cfg.storage_writer_service();
        assert_eq!(writer.worker_concurrency, Some(2));
        assert_eq!(writer.postgres.as_deref(), Some("main"));
        assert_eq!(
            cfg.postgres_profile("main").unwrap().url,
            "postgres://localhost/murmur"
        );
    }

    #[test]
    fn missing_overlay_file_is_ignored() {
        let mut cfg = parse_config("").unwrap();
        ConfigManager::apply_overlay_file(&mut cfg, Path::new("does/not/exist.toml")).unwrap();
        assert_eq!(cfg.logging.level, "info");
    }
}
