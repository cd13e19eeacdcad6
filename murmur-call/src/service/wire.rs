//! 依赖装配：通话仓储、群组仓储、推送中心与会话管理器

use std::sync::Arc;

use anyhow::Result;
use murmur_push::{ChatNotifier, InMemoryPushHub};
use murmur_storage_model::{CallRepository, GroupRepository};
use murmur_storage_repository::{InMemoryChatStore, PostgresChatStore};
use tokio::task::JoinHandle;
use tracing::info;

use crate::application::CallCommandHandler;
use crate::config::CallConfig;
use crate::domain::{DirectCallRelay, GroupCallSessionManager};

pub struct CallComponents {
    pub commands: Arc<CallCommandHandler>,
    pub sessions: Arc<GroupCallSessionManager>,
    pub notifier: ChatNotifier,
    pub hub: InMemoryPushHub,
    pub fanout_task: JoinHandle<()>,
}

/// 使用配置中的存储构建组件
pub async fn initialize(config: &CallConfig) -> Result<CallComponents> {
    let hub = InMemoryPushHub::new();
    let (notifier, fanout_task) =
        ChatNotifier::spawn(Arc::new(hub.clone()), config.fanout_queue_capacity);

    let sessions = match &config.postgres {
        Some(postgres) => {
            let store = PostgresChatStore::connect(postgres).await?;
            store.init_schema().await?;
            info!("call service using postgres store");
            with_store(Arc::new(store), notifier.clone(), config)
        }
        None => {
            info!("call service using in-memory store");
            with_store(Arc::new(InMemoryChatStore::new()), notifier.clone(), config)
        }
    };

    Ok(CallComponents {
        commands: Arc::new(CallCommandHandler::new(
            sessions.clone(),
            Arc::new(DirectCallRelay::new(notifier.clone())),
        )),
        sessions,
        notifier,
        hub,
        fanout_task,
    })
}

/// `store` 同时提供通话与群组仓储
pub fn with_store<S>(
    store: Arc<S>,
    notifier: ChatNotifier,
    config: &CallConfig,
) -> Arc<GroupCallSessionManager>
where
    S: CallRepository + GroupRepository + 'static,
{
    let calls: Arc<dyn CallRepository> = store.clone();
    let groups: Arc<dyn GroupRepository> = store;
    Arc::new(GroupCallSessionManager::new(calls, groups, notifier, config))
}
