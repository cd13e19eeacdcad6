//! 应用启动器：读取配置并装配通话组件
use anyhow::Result;
use murmur_im_core::MurmurAppConfig;
use tracing::info;

use crate::config::CallConfig;
use crate::service::wire::{self, CallComponents};

pub struct CallServiceBootstrap;

impl CallServiceBootstrap {
    /// 按应用配置构建通话服务；存储由 `services.call.postgres` 决定
    pub async fn build(app: &MurmurAppConfig) -> Result<CallComponents> {
        let config = CallConfig::from_app_config(app)?;
        info!(
            default_max_participants = config.default_max_participants,
            max_participants_limit = config.max_participants_limit,
            postgres = config.postgres.is_some(),
            "starting call service"
        );
        wire::initialize(&config).await
    }
}
