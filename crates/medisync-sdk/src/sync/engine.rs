//! 复制引擎 - 每个集合独立的 pull/push 对账
//!
//! ## NOTE: Engine 不做重试
//!
//! ReplicationEngine does not retry. All retry / backoff / lifecycle policies
//! live in SyncScheduler. 引擎只负责一轮机械的 pull + push：
//! - pull：从检查点水位起分批拉取，逐条 upsert，本地挂起修改用冲突解决器裁决
//! - push：选取 pending/failed（跳过终态失败），临时 ID 走 create，服务端 ID 走 update
//!
//! 集合内 pull/push 严格串行（同一把集合锁），避免 pull 覆盖掉在途 push；
//! 集合之间互不等待。所有远端副作用可安全重复执行：upsert 按 id 幂等，
//! create 携带临时 ID 作幂等令牌，多实例并发排水不会产生重复数据。

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::api::RemoteApi;
use crate::error::Result;
use crate::events::{EventBus, SyncEvent};
use crate::network::NetworkMonitor;
use crate::storage::documents::{is_local_id, Collection, Document, ALL_COLLECTIONS};
use crate::storage::StorageManager;
use crate::sync::resolver::{resolve, Resolution};
use crate::sync::retry_policy::SyncFailureReason;
use crate::sync::SyncState;

/// 单个集合一轮同步的结果
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectionSyncOutcome {
    pub pulled: usize,
    pub pushed: usize,
}

/// 集合级失败（调度器据此决定退避）
#[derive(Debug, Clone)]
pub struct CollectionFailure {
    pub collection: Collection,
    pub reason: SyncFailureReason,
    pub message: String,
}

/// 一轮全集合同步的汇总
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub pulled: usize,
    pub pushed: usize,
    pub failures: Vec<CollectionFailure>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// 是否还有值得退避重试的失败
    pub fn has_retryable_failure(&self) -> bool {
        self.failures.iter().any(|f| f.reason.is_retryable())
    }
}

#[derive(Debug)]
struct CollectionSlot {
    /// 集合内串行锁：pull 与 push 绝不交错
    lock: Mutex<()>,
    state: RwLock<SyncState>,
}

impl CollectionSlot {
    fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            state: RwLock::new(SyncState::Idle),
        }
    }
}

/// 复制引擎
#[derive(Debug)]
pub struct ReplicationEngine {
    storage: Arc<StorageManager>,
    api: Arc<dyn RemoteApi>,
    network: Arc<NetworkMonitor>,
    events: EventBus,
    pull_batch_size: usize,
    slots: HashMap<Collection, CollectionSlot>,
}

impl ReplicationEngine {
    pub fn new(
        storage: Arc<StorageManager>,
        api: Arc<dyn RemoteApi>,
        network: Arc<NetworkMonitor>,
        events: EventBus,
        pull_batch_size: usize,
    ) -> Self {
        let slots = ALL_COLLECTIONS
            .iter()
            .map(|&collection| (collection, CollectionSlot::new()))
            .collect();
        Self {
            storage,
            api,
            network,
            events,
            pull_batch_size: pull_batch_size.max(1),
            slots,
        }
    }

    /// 当前状态（监控/调试用）
    pub async fn state(&self, collection: Collection) -> SyncState {
        self.slots[&collection].state.read().await.clone()
    }

    /// 全集合一轮同步；集合失败不阻断其余集合，失败汇总在报告里
    pub async fn sync_all(&self) -> SyncReport {
        self.events.emit(SyncEvent::SyncStarted);
        let mut report = SyncReport::default();

        for &collection in ALL_COLLECTIONS {
            // 断网即放弃本轮剩余集合；在途文档保持 pending/failed，下轮续跑
            if !self.network.is_online().await {
                debug!("网络离线，放弃本轮剩余集合同步");
                break;
            }
            match self.sync_collection(collection).await {
                Ok(outcome) => {
                    report.pulled += outcome.pulled;
                    report.pushed += outcome.pushed;
                }
                Err(err) => {
                    let message = err.to_string();
                    self.events.emit(SyncEvent::SyncFailed {
                        collection,
                        error: message.clone(),
                    });
                    report.failures.push(CollectionFailure {
                        collection,
                        reason: SyncFailureReason::classify(&err),
                        message,
                    });
                }
            }
        }

        if let Ok(count) = self.storage.pending().count_all_pending().await {
            self.events.emit(SyncEvent::PendingCountChanged { count });
        }
        self.events.emit(SyncEvent::SyncCompleted {
            pushed: report.pushed,
            pulled: report.pulled,
        });
        info!(
            "🔄 同步一轮完成: pulled={} pushed={} failures={}",
            report.pulled,
            report.pushed,
            report.failures.len()
        );
        report
    }

    /// 单集合一轮同步：pull → push，持集合锁全程串行
    pub async fn sync_collection(&self, collection: Collection) -> Result<CollectionSyncOutcome> {
        let slot = &self.slots[&collection];
        let _guard = slot.lock.lock().await;

        *slot.state.write().await = SyncState::PullInProgress;
        let pulled = match self.pull(collection).await {
            Ok(n) => n,
            Err(err) => {
                *slot.state.write().await = SyncState::Error {
                    message: err.to_string(),
                };
                return Err(err);
            }
        };

        *slot.state.write().await = SyncState::PushInProgress;
        let pushed = match self.push(collection).await {
            Ok(n) => n,
            Err(err) => {
                *slot.state.write().await = SyncState::Error {
                    message: err.to_string(),
                };
                return Err(err);
            }
        };

        *slot.state.write().await = SyncState::Idle;
        Ok(CollectionSyncOutcome { pulled, pushed })
    }

    /// pull：从检查点起分批拉取；空批不动水位
    async fn pull(&self, collection: Collection) -> Result<usize> {
        let checkpoints = self.storage.checkpoints();
        let mut since = checkpoints
            .get(collection)
            .await?
            .and_then(|cp| cp.checkpoint);
        let mut total = 0usize;

        loop {
            let batch = self
                .api
                .fetch_since(collection, since, self.pull_batch_size)
                .await?;
            if batch.is_empty() {
                // 没有新数据：只刷新 last_sync，水位保持不变
                checkpoints.touch(collection, Utc::now()).await?;
                break;
            }

            let batch_len = batch.len();
            let mut watermark = None;
            for wire in batch {
                let incoming = wire.into_document(collection, Utc::now())?;
                watermark = Some(incoming.updated_at);
                self.apply_pulled(collection, incoming).await?;
                total += 1;
            }
            if let Some(watermark) = watermark {
                checkpoints.advance(collection, watermark, Utc::now()).await?;
                since = Some(watermark);
            }
            if batch_len < self.pull_batch_size {
                break;
            }
        }

        debug!("⬇️ {} pull 完成: {} 条", collection, total);
        Ok(total)
    }

    /// 单条服务端文档落库；本地还有挂起修改时先过冲突解决器
    async fn apply_pulled(&self, collection: Collection, incoming: Document) -> Result<()> {
        let store = self.storage.documents();
        match store.find_by_id(collection, &incoming.id).await? {
            Some(local) if local.is_pending() => match resolve(&local, &incoming) {
                Resolution::ServerWins => {
                    // 本地挂起修改整体丢弃，不再 push
                    debug!(
                        "冲突: {} {} 服务端版本胜出，丢弃本地挂起修改",
                        collection, incoming.id
                    );
                    store.upsert(&incoming).await?;
                }
                Resolution::LocalWins => {
                    debug!(
                        "冲突: {} {} 本地版本更新，保留待 push",
                        collection, incoming.id
                    );
                }
            },
            Some(local) if local.updated_at > incoming.updated_at => {
                // 已同步文档的 updatedAt 不允许回退
                debug!("跳过过期的服务端文档 {} {}", collection, incoming.id);
            }
            _ => store.upsert(&incoming).await?,
        }
        Ok(())
    }

    /// push：临时 ID 走 create，服务端 ID 走 update
    async fn push(&self, collection: Collection) -> Result<usize> {
        let eligible = self.storage.pending().push_eligible(collection).await?;
        if eligible.is_empty() {
            return Ok(0);
        }

        let mut pushed = 0usize;
        for doc in eligible {
            if is_local_id(&doc.id) {
                pushed += self.push_create(collection, doc).await?;
            } else {
                pushed += self.push_update(collection, doc).await?;
            }
        }
        debug!("⬆️ {} push 完成: {} 条", collection, pushed);
        Ok(pushed)
    }

    /// 离线新建的上行；成功后临时文档让位给服务端文档
    async fn push_create(&self, collection: Collection, doc: Document) -> Result<usize> {
        let body = doc.to_wire_body()?;
        match self.api.create(collection, body, &doc.id).await {
            Ok(wire) => {
                let synced = wire.into_document(collection, Utc::now())?;
                let store = self.storage.documents();
                // 先删临时行再插服务端行；两步都是单条原子操作，中途断电最差是重拉一次
                store.remove(collection, &doc.id).await?;
                store.upsert(&synced).await?;
                debug!(
                    "create 确认: {} {} -> {}",
                    collection, doc.id, synced.id
                );
                Ok(1)
            }
            Err(err) => self.handle_push_failure(collection, &doc, err).await,
        }
    }

    /// 离线编辑的上行；版本过期时取服务端权威版本归一
    async fn push_update(&self, collection: Collection, doc: Document) -> Result<usize> {
        let body = doc.to_wire_body()?;
        match self.api.update(collection, &doc.id, body).await {
            Ok(_) => {
                self.storage.pending().mark_synced(collection, &doc.id).await?;
                Ok(1)
            }
            Err(err) if err.is_stale_conflict() => {
                let wire = self.api.fetch_one(collection, &doc.id).await?;
                let server_doc = wire.into_document(collection, Utc::now())?;
                match resolve(&doc, &server_doc) {
                    Resolution::ServerWins => {
                        // 被拒的本地修改整体丢弃，不进入重试循环
                        self.storage.documents().upsert(&server_doc).await?;
                        debug!(
                            "冲突: {} {} push 被拒，服务端版本落库",
                            collection, doc.id
                        );
                    }
                    Resolution::LocalWins => {
                        // 服务端以更旧的副本拒绝了我们，保持挂起，下轮再试
                        warn!(
                            "冲突: {} {} 本地版本更新却被拒，保持挂起",
                            collection, doc.id
                        );
                    }
                }
                Ok(0)
            }
            Err(err) => self.handle_push_failure(collection, &doc, err).await,
        }
    }

    /// 失败分类落地：连通性失败中止整轮（文档原样保留），其余标记 failed
    async fn handle_push_failure(
        &self,
        collection: Collection,
        doc: &Document,
        err: crate::error::MedisyncSDKError,
    ) -> Result<usize> {
        let reason = SyncFailureReason::classify(&err);
        if err.is_connectivity() {
            // 断网：不动文档状态，整轮中止，重连后从头再来
            return Err(err);
        }
        let terminal = reason.is_terminal();
        self.storage
            .pending()
            .mark_failed(collection, &doc.id, terminal)
            .await?;
        warn!(
            "push 失败: {} {} ({}){}",
            collection,
            doc.id,
            err,
            if terminal { "，终态不再重试" } else { "，待重试" }
        );
        self.events.emit(SyncEvent::SyncFailed {
            collection,
            error: err.to_string(),
        });
        Ok(0)
    }
}
