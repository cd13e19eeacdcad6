//! Murmur IM Core 配置模块
//!
//! 该模块提供了完整的应用程序配置管理功能，包括：
//! - 配置文件加载和解析（单文件或目录合并）
//! - 环境特定配置覆盖
//! - 各服务配置定义
//! - 消息代理、数据库等基础设施配置

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use toml::Value;
use tracing::warn;

mod manager;
pub use manager::ConfigManager;

/// 全局应用配置实例，使用 OnceLock 确保只初始化一次
static APP_CONFIG: OnceLock<MurmurAppConfig> = OnceLock::new();

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 未设置时生效）
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub with_target: bool,
    #[serde(default = "default_true")]
    pub with_thread_ids: bool,
    #[serde(default = "default_true")]
    pub with_file: bool,
    #[serde(default = "default_true")]
    pub with_line_number: bool,
    /// 以 JSON 格式输出
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: false,
            with_thread_ids: true,
            with_file: true,
            with_line_number: true,
            json: false,
        }
    }
}

/// 服务基础信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfoConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_service_version")]
    pub version: String,
}

fn default_service_name() -> String {
    "murmur-im-core".to_string()
}

fn default_service_version() -> String {
    "0.1.0".to_string()
}

impl Default for ServiceInfoConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            version: default_service_version(),
        }
    }
}

/// 消息代理类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// Kafka（生产环境）
    Kafka,
    /// 进程内交换机（开发和单测）
    #[default]
    Memory,
}

impl std::str::FromStr for BrokerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kafka" => Ok(BrokerKind::Kafka),
            "memory" | "in-memory" | "inmemory" => Ok(BrokerKind::Memory),
            other => Err(anyhow!("unknown broker kind: {other}")),
        }
    }
}

/// Kafka 集群配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KafkaClusterConfig {
    /// Kafka 服务器地址列表
    pub bootstrap_servers: String,
    /// 客户端标识
    #[serde(default)]
    pub client_id: Option<String>,
    /// 安全协议
    #[serde(default)]
    pub security_protocol: Option<String>,
    /// SASL 用户名
    #[serde(default)]
    pub sasl_username: Option<String>,
    /// SASL 密码
    #[serde(default)]
    pub sasl_password: Option<String>,
    /// 超时时间（毫秒）
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// 其他选项
    #[serde(default)]
    pub options: HashMap<String, String>,
}

/// PostgreSQL 数据库实例配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PostgresInstanceConfig {
    /// 数据库连接 URL
    pub url: String,
    /// 最大连接数
    #[serde(default)]
    pub max_connections: Option<u32>,
    /// 最小连接数
    #[serde(default)]
    pub min_connections: Option<u32>,
}

/// 存储写入服务（消费者）配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageWriterServiceConfig {
    /// 代理类型
    #[serde(default)]
    pub broker: Option<BrokerKind>,
    /// Kafka 配置名
    #[serde(default)]
    pub kafka: Option<String>,
    /// 交换机（Kafka 下即主题）
    #[serde(default)]
    pub exchange: Option<String>,
    /// 持久队列（Kafka 下即消费者组）
    #[serde(default)]
    pub queue: Option<String>,
    /// 绑定模式
    #[serde(default)]
    pub binding: Option<String>,
    /// PostgreSQL 配置名
    #[serde(default)]
    pub postgres: Option<String>,
    /// 并发处理数
    #[serde(default)]
    pub worker_concurrency: Option<usize>,
    /// 优雅停机等待时间（毫秒）
    #[serde(default)]
    pub shutdown_grace_ms: Option<u64>,
    /// 处理失败后重新入队前的初始退避（毫秒）
    #[serde(default)]
    pub retry_backoff_ms: Option<u64>,
    /// 连续失败时退避上限（毫秒）
    #[serde(default)]
    pub max_retry_backoff_ms: Option<u64>,
}

/// 消息编排（发布端）服务配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OrchestratorServiceConfig {
    /// 代理类型
    #[serde(default)]
    pub broker: Option<BrokerKind>,
    /// Kafka 配置名
    #[serde(default)]
    pub kafka: Option<String>,
    /// 发布目标交换机（Kafka 下即主题）
    #[serde(default)]
    pub exchange: Option<String>,
}

/// 群通话服务配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CallServiceConfig {
    /// 默认最大参与人数
    #[serde(default)]
    pub default_max_participants: Option<u32>,
    /// 允许的最大参与人数上限
    #[serde(default)]
    pub max_participants_limit: Option<u32>,
    /// PostgreSQL 配置名
    #[serde(default)]
    pub postgres: Option<String>,
}

/// 推送服务配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PushServiceConfig {
    /// 扇出队列容量
    #[serde(default)]
    pub fanout_queue_capacity: Option<usize>,
}

/// 服务配置集合
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServicesConfig {
    #[serde(default)]
    pub storage_writer: Option<StorageWriterServiceConfig>,
    #[serde(default)]
    pub orchestrator: Option<OrchestratorServiceConfig>,
    #[serde(default)]
    pub call: Option<CallServiceConfig>,
    #[serde(default)]
    pub push: Option<PushServiceConfig>,
}

/// Murmur 应用配置主结构体
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MurmurAppConfig {
    /// 服务信息
    #[serde(default)]
    pub service: ServiceInfoConfig,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Kafka 配置映射
    #[serde(default)]
    pub kafka: HashMap<String, KafkaClusterConfig>,
    /// PostgreSQL 配置映射
    #[serde(default)]
    pub postgres: HashMap<String, PostgresInstanceConfig>,
    /// 服务配置
    #[serde(default)]
    pub services: ServicesConfig,
}

impl MurmurAppConfig {
    /// 获取 Kafka 配置
    pub fn kafka_profile(&self, name: &str) -> Option<&KafkaClusterConfig> {
        self.kafka.get(name)
    }

    /// 获取 PostgreSQL 配置
    pub fn postgres_profile(&self, name: &str) -> Option<&PostgresInstanceConfig> {
        self.postgres.get(name)
    }

    /// 获取存储写入服务配置
    pub fn storage_writer_service(&self) -> StorageWriterServiceConfig {
        self.services.storage_writer.clone().unwrap_or_default()
    }

    /// 获取消息编排服务配置
    pub fn orchestrator_service(&self) -> OrchestratorServiceConfig {
        self.services.orchestrator.clone().unwrap_or_default()
    }

    /// 获取群通话服务配置
    pub fn call_service(&self) -> CallServiceConfig {
        self.services.call.clone().unwrap_or_default()
    }

    /// 获取推送服务配置
    pub fn push_service(&self) -> PushServiceConfig {
        self.services.push.clone().unwrap_or_default()
    }

    /// 校验服务配置中引用的 kafka / postgres 配置名均存在
    pub fn validate_references(&self) -> Result<()> {
        let writer = self.storage_writer_service();
        if let Some(name) = writer.kafka.as_deref() {
            if self.kafka_profile(name).is_none() {
                return Err(anyhow!("services.storage_writer references unknown kafka profile `{name}`"));
            }
        }
        if writer.broker == Some(BrokerKind::Kafka) && writer.kafka.is_none() {
            return Err(anyhow!("services.storage_writer uses kafka broker but names no kafka profile"));
        }
        if let Some(name) = writer.postgres.as_deref() {
            if self.postgres_profile(name).is_none() {
                return Err(anyhow!("services.storage_writer references unknown postgres profile `{name}`"));
            }
        }
        let orchestrator = self.orchestrator_service();
        if let Some(name) = orchestrator.kafka.as_deref() {
            if self.kafka_profile(name).is_none() {
                return Err(anyhow!("services.orchestrator references unknown kafka profile `{name}`"));
            }
        }
        if orchestrator.broker == Some(BrokerKind::Kafka) && orchestrator.kafka.is_none() {
            return Err(anyhow!("services.orchestrator uses kafka broker but names no kafka profile"));
        }
        if let Some(name) = self.call_service().postgres.as_deref() {
            if self.postgres_profile(name).is_none() {
                return Err(anyhow!("services.call references unknown postgres profile `{name}`"));
            }
        }
        Ok(())
    }

    /// 确保配置有默认值
    fn ensure_defaults(&mut self) {
        if self.service.name.is_empty() {
            self.service.name = default_service_name();
        }
        if self.logging.level.is_empty() {
            self.logging.level = default_log_level();
        }
    }
}

/// 加载配置
pub fn load_config(path: Option<&str>) -> &'static MurmurAppConfig {
    let candidates: Vec<PathBuf> = match path {
        Some(p) => vec![PathBuf::from(p)],
        None => vec![PathBuf::from("config"), PathBuf::from("config.toml")],
    };

    APP_CONFIG.get_or_init(|| {
        let mut cfg = load_with_fallback(&candidates);
        if let Err(e) = ConfigManager::load_environment_config(&mut cfg) {
            warn!("failed to load environment config: {}", e);
        }
        cfg
    })
}

/// 获取应用配置（未加载时返回 None）
pub fn app_config() -> Option<&'static MurmurAppConfig> {
    APP_CONFIG.get()
}

/// 直接从 TOML 文本解析配置（不写入全局实例）
pub fn parse_config(content: &str) -> Result<MurmurAppConfig> {
    let mut cfg: MurmurAppConfig = toml::from_str(content).context("invalid config format")?;
    cfg.ensure_defaults();
    Ok(cfg)
}

/// 使用备选方案加载配置
fn load_with_fallback(candidates: &[PathBuf]) -> MurmurAppConfig {
    for path in candidates {
        match load_config_from_source(path) {
            Ok(mut cfg) => {
                cfg.ensure_defaults();
                return cfg;
            }
            Err(err) => {
                warn!("failed to load config from {}: {err}", path.display());
            }
        }
    }

    warn!("no configuration source succeeded, falling back to defaults");
    MurmurAppConfig::default()
}

/// 从源加载配置
pub fn load_config_from_source(path: &Path) -> Result<MurmurAppConfig> {
    if !path.exists() {
        return Err(anyhow!(
            "configuration path {} does not exist",
            path.display()
        ));
    }

    let metadata = path
        .metadata()
        .with_context(|| format!("unable to read metadata for {}", path.display()))?;

    if metadata.is_dir() {
        load_config_from_directory(path)
    } else {
        load_config_from_file(path)
    }
}

/// 从文件加载配置
fn load_config_from_file(path: &Path) -> Result<MurmurAppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config file: {}", path.display()))?;
    let mut cfg: MurmurAppConfig = toml::from_str(&content)
        .with_context(|| format!("invalid config format: {}", path.display()))?;
    cfg.ensure_defaults();
    Ok(cfg)
}

/// 从目录加载配置：base.toml + shared/ + services/ + overrides/
fn load_config_from_directory(path: &Path) -> Result<MurmurAppConfig> {
    let base_file = path.join("base.toml");
    if !base_file.exists() {
        return Err(anyhow!(
            "missing base configuration: {}",
            base_file.display()
        ));
    }

    let mut merged = load_toml_value(&base_file)?;

    if !merged.is_table() {
        return Err(anyhow!(
            "base configuration must be a table: {}",
            base_file.display()
        ));
    }

    merge_directory(&mut merged, &path.join("shared"))?;
    merge_directory(&mut merged, &path.join("services"))?;
    merge_directory(&mut merged, &path.join("overrides"))?;

    let cfg: MurmurAppConfig = merged
        .try_into()
        .with_context(|| format!("invalid configuration after merging {}", path.display()))?;

    Ok(cfg)
}

/// 合并目录中的配置片段（按文件名排序）
fn merge_directory(root: &mut Value, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("unable to read config directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(OsStr::to_str)
                .map(|ext| ext.eq_ignore_ascii_case("toml"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();

    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let value = load_toml_value(&entry.path())?;
        merge_value(root, value);
    }

    Ok(())
}

fn load_toml_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config fragment {}", path.display()))?;
    let value: Value = toml::from_str(&content)
        .with_context(|| format!("invalid TOML content in fragment {}", path.display()))?;
    Ok(value)
}

/// 递归合并：表按键合并，其余类型整体覆盖
pub(crate) fn merge_value(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Table(overlay_table) => {
            if let Value::Table(base_table) = base {
                for (key, overlay_value) in overlay_table.into_iter() {
                    match base_table.get_mut(&key) {
                        Some(base_value) => merge_value(base_value, overlay_value),
                        None => {
                            base_table.insert(key, overlay_value);
                        }
                    }
                }
            } else {
                *base = Value::Table(overlay_table);
            }
        }
        other => {
            *base = other;
        }
    }
}
