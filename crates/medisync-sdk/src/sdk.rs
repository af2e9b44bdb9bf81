//! SDK 门面 - 显式构造、显式关闭的同步核心入口
//!
//! 所有组件在 `initialize` 里组装并相互注入（没有全局单例数据库句柄）：
//! 存储层 → 网络监控 → REST 客户端 → 写网关 / 复制引擎 / 调度器 / 预热器。
//! UI 层只跟本门面和事件总线打交道。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

use crate::api::{RemoteApi, RestApiClient};
use crate::error::{MedisyncSDKError, Result};
use crate::events::{EventBus, SyncEvent};
use crate::gateway::{WriteGateway, WriteOptions, WriteOutcome};
use crate::network::{NetworkMonitor, NetworkStatusListener};
use crate::storage::document_store::DocumentSelector;
use crate::storage::documents::{Collection, Document, DocumentPayload};
use crate::storage::StorageManager;
use crate::sync::{
    CacheWarmer, ReplicationEngine, RetryPolicy, SyncReport, SyncScheduler, WarmOutcome, WarmScope,
};

/// SDK 配置
#[derive(Debug, Clone)]
pub struct MedisyncConfig {
    /// 数据存储目录（文档库 + KV）
    pub data_dir: PathBuf,
    /// 远端 API 基础 URL，例如 `https://api.example.com`
    pub api_base_url: String,
    /// 连接超时（秒）
    pub connect_timeout_secs: u64,
    /// 请求超时（秒）；超时按连通性失败处理
    pub request_timeout_secs: u64,
    /// pull 单批条数上限
    pub pull_batch_size: usize,
    /// 重连后的 settle 延迟（毫秒），避免追着抖动的连接同步
    pub settle_delay_ms: u64,
    /// 同步失败的退避策略
    pub retry_policy: RetryPolicy,
    /// 事件总线缓冲区大小
    pub event_buffer_size: usize,
}

impl Default for MedisyncConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./medisync-data"),
            api_base_url: "http://localhost:3000".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            pull_batch_size: 100,
            settle_delay_ms: 2_000,
            retry_policy: RetryPolicy::default(),
            event_buffer_size: 256,
        }
    }
}

impl MedisyncConfig {
    pub fn builder() -> MedisyncConfigBuilder {
        MedisyncConfigBuilder::new()
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct MedisyncConfigBuilder {
    config: MedisyncConfig,
}

impl MedisyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: MedisyncConfig::default(),
        }
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn api_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.config.connect_timeout_secs = secs;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn pull_batch_size(mut self, size: usize) -> Self {
        self.config.pull_batch_size = size;
        self
    }

    pub fn settle_delay_ms(mut self, ms: u64) -> Self {
        self.config.settle_delay_ms = ms;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry_policy = policy;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size;
        self
    }

    pub fn build(self) -> MedisyncConfig {
        self.config
    }
}

/// 同步核心 SDK
#[derive(Debug)]
pub struct MedisyncSDK {
    #[allow(dead_code)]
    config: MedisyncConfig,
    storage: Arc<StorageManager>,
    network: Arc<NetworkMonitor>,
    gateway: WriteGateway,
    engine: Arc<ReplicationEngine>,
    warmer: CacheWarmer,
    events: EventBus,
    shutdown_tx: watch::Sender<bool>,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MedisyncSDK {
    /// 用真实 REST 客户端初始化
    pub async fn initialize(
        config: MedisyncConfig,
        listener: Arc<dyn NetworkStatusListener>,
    ) -> Result<Arc<Self>> {
        let api: Arc<dyn RemoteApi> = Arc::new(RestApiClient::new(
            &config.api_base_url,
            Duration::from_secs(config.connect_timeout_secs),
            Duration::from_secs(config.request_timeout_secs),
        )?);
        Self::initialize_with_api(config, api, listener).await
    }

    /// 注入自定义远端实现（测试、替代传输层）
    pub async fn initialize_with_api(
        config: MedisyncConfig,
        api: Arc<dyn RemoteApi>,
        listener: Arc<dyn NetworkStatusListener>,
    ) -> Result<Arc<Self>> {
        let storage = Arc::new(StorageManager::open(&config.data_dir).await?);
        let events = EventBus::new(config.event_buffer_size);

        let network = Arc::new(NetworkMonitor::new(listener));
        network.start().await?;

        let gateway = WriteGateway::new(
            storage.clone(),
            api.clone(),
            network.clone(),
            events.clone(),
        );
        let engine = Arc::new(ReplicationEngine::new(
            storage.clone(),
            api.clone(),
            network.clone(),
            events.clone(),
            config.pull_batch_size,
        ));
        let warmer = CacheWarmer::new(storage.clone(), api.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = SyncScheduler::new(
            engine.clone(),
            network.clone(),
            config.retry_policy.clone(),
            Duration::from_millis(config.settle_delay_ms),
        );
        let scheduler_handle = scheduler.spawn(shutdown_rx.clone());

        // 网络跳变转发到事件总线，UI 据此切「离线缓存」横幅
        let forward_handle = {
            let mut network_rx = network.subscribe();
            let events = events.clone();
            let mut shutdown_rx = shutdown_rx;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                        }
                        event = network_rx.recv() => match event {
                            Ok(event) => events.emit_network(event.new_status),
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        },
                    }
                }
            })
        };

        info!("✅ MedisyncSDK 初始化完成 (data_dir={:?})", config.data_dir);

        Ok(Arc::new(Self {
            config,
            storage,
            network,
            gateway,
            engine,
            warmer,
            events,
            shutdown_tx,
            background_tasks: Mutex::new(vec![scheduler_handle, forward_handle]),
        }))
    }

    /// 提交一次写（所有表单/操作的唯一入口）
    pub async fn submit(
        &self,
        payload: DocumentPayload,
        options: WriteOptions,
    ) -> Result<WriteOutcome> {
        self.gateway.submit(payload, options).await
    }

    /// 删除（仅在线）
    pub async fn delete(&self, collection: Collection, id: &str) -> Result<()> {
        self.gateway.delete(collection, id).await
    }

    /// 手动触发一轮同步
    pub async fn sync_now(&self) -> Result<SyncReport> {
        if !self.network.is_online().await {
            return Err(MedisyncSDKError::Connectivity(
                "手动同步需要网络连接".into(),
            ));
        }
        Ok(self.engine.sync_all().await)
    }

    /// 按角色预热缓存
    pub async fn warm_cache(&self, scope: &WarmScope) -> Result<WarmOutcome> {
        self.warmer.warm(scope).await
    }

    /// 本地查询（UI 始终从本地库渲染）
    pub async fn find(
        &self,
        collection: Collection,
        selector: &DocumentSelector,
    ) -> Result<Vec<Document>> {
        self.storage.documents().find(collection, selector).await
    }

    pub async fn find_by_id(&self, collection: Collection, id: &str) -> Result<Option<Document>> {
        self.storage.documents().find_by_id(collection, id).await
    }

    /// 挂起角标
    pub async fn pending_count(&self) -> Result<u64> {
        self.storage.pending().count_all_pending().await
    }

    pub async fn is_online(&self) -> bool {
        self.network.is_online().await
    }

    /// 订阅同步核心事件
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// 清空文档缓存（检查点保留，预热可回填）
    pub async fn clear_cache(&self) -> Result<()> {
        self.storage.clear_cache().await?;
        self.events.emit(SyncEvent::PendingCountChanged { count: 0 });
        Ok(())
    }

    /// 存储层句柄（高级用法/测试）
    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    /// 关闭：停掉后台任务，存储刷盘
    pub async fn shutdown(&self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        let mut tasks = self.background_tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        self.storage.close().await?;
        info!("MedisyncSDK 已关闭");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_helpers::MockRemoteApi;
    use crate::network::test_helpers::ScriptedNetworkListener;
    use crate::network::NetworkStatus;
    use crate::storage::documents::{PatientRecord, SyncStatus};

    fn patient_payload(name: &str) -> DocumentPayload {
        DocumentPayload::Patient(PatientRecord {
            name: name.into(),
            email: format!("{}@example.com", name),
            hospital_id: "h1".into(),
            phone: None,
            date_of_birth: None,
            blood_group: None,
            address: None,
        })
    }

    #[tokio::test]
    async fn initialize_submit_query_shutdown() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = MedisyncConfig::builder()
            .data_dir(temp_dir.path())
            .settle_delay_ms(10)
            .build();
        let api = Arc::new(MockRemoteApi::new());
        let listener = Arc::new(ScriptedNetworkListener::new(NetworkStatus::Online));
        let sdk = MedisyncSDK::initialize_with_api(config, api, listener)
            .await
            .unwrap();

        let outcome = sdk
            .submit(patient_payload("ada"), WriteOptions::create())
            .await
            .unwrap();
        let id = outcome.document().id.clone();

        let doc = sdk
            .find_by_id(Collection::Patient, &id)
            .await
            .unwrap()
            .expect("submitted document must be queryable");
        assert_eq!(doc.sync_status, SyncStatus::Synced);
        assert_eq!(sdk.pending_count().await.unwrap(), 0);

        sdk.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn offline_submit_then_reconnect_drains() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = MedisyncConfig::builder()
            .data_dir(temp_dir.path())
            .settle_delay_ms(10)
            .build();
        let api = Arc::new(MockRemoteApi::new());
        let listener = Arc::new(ScriptedNetworkListener::new(NetworkStatus::Offline));
        let sdk = MedisyncSDK::initialize_with_api(config, api, listener.clone())
            .await
            .unwrap();

        let outcome = sdk
            .submit(patient_payload("ada"), WriteOptions::create())
            .await
            .unwrap();
        let temp_id = outcome.document().id.clone();
        assert_eq!(sdk.pending_count().await.unwrap(), 1);

        listener.flip(NetworkStatus::Online);

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
        while sdk.pending_count().await.unwrap() > 0 {
            assert!(
                tokio::time::Instant::now() < deadline,
                "reconnect drain never completed"
            );
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        // 临时文档已让位给服务端文档
        assert!(sdk
            .find_by_id(Collection::Patient, &temp_id)
            .await
            .unwrap()
            .is_none());
        let synced = sdk
            .find_by_id(Collection::Patient, "srv_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(synced.sync_status, SyncStatus::Synced);

        sdk.shutdown().await.unwrap();
    }
}
