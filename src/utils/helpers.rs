//! 辅助工具函数模块
//!
//! 提供配置加载、服务初始化等常用辅助函数

use anyhow::{Context, Result};

use crate::config::MurmurAppConfig;

/// 服务启动辅助函数
pub struct ServiceHelper;

impl ServiceHelper {
    /// 加载配置并验证
    ///
    /// # 参数
    /// * `config_path` - 配置路径
    /// * `strict` - 是否严格验证配置引用
    pub fn load_config(config_path: Option<&str>, strict: bool) -> Result<&'static MurmurAppConfig> {
        let config = crate::config::load_config(config_path);

        if strict {
            config
                .validate_references()
                .with_context(|| "configuration validation failed")?;
            return Ok(config);
        }

        // 非严格模式下，即使验证失败也继续运行，只记录警告日志
        if let Err(e) = config.validate_references() {
            tracing::warn!("configuration reference validation failed: {}", e);
        }

        Ok(config)
    }

    /// 加载配置并初始化日志
    pub fn bootstrap(config_path: Option<&str>) -> Result<&'static MurmurAppConfig> {
        let config = Self::load_config(config_path, false)?;
        crate::tracing::init_service_tracing(&config.service.name, Some(&config.logging));
        Ok(config)
    }
}
