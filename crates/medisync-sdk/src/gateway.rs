//! 写网关 - 用户发起的修改进入持久化状态的唯一通道
//!
//! 每次写按当前网络状态二选一：
//! - 在线：直连远端，成功后把服务端权威文档按 synced 镜像进本地库；
//!   业务失败立即上抛（在线失败不是连通性问题，不允许悄悄入队延后）
//! - 离线：不碰网络，分配/复用 ID 后按 pending 写进本地库，等复制引擎排水
//!
//! 例外：监视器说在线但请求实际断网（信号误报/刚好掉线），
//! 按连通性失败降级为离线写，不把网络错误抛给用户。

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use crate::api::RemoteApi;
use crate::error::{MedisyncSDKError, Result};
use crate::events::{EventBus, SyncEvent};
use crate::network::NetworkMonitor;
use crate::storage::documents::{
    is_local_id, new_local_id, Collection, Document, DocumentMeta, DocumentPayload, SyncStatus,
};
use crate::storage::StorageManager;

/// 写选项
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// 编辑已有文档时传入其 ID（服务端 ID 或尚未同步的临时 ID）；
    /// 缺省表示新建
    pub existing_id: Option<String>,
}

impl WriteOptions {
    pub fn create() -> Self {
        Self::default()
    }

    pub fn update(id: impl Into<String>) -> Self {
        Self {
            existing_id: Some(id.into()),
        }
    }
}

/// 写结果
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    /// 服务端已确认，返回权威文档
    Committed(Document),
    /// 已离线保存，等待重连后同步
    QueuedOffline(Document),
}

impl WriteOutcome {
    pub fn document(&self) -> &Document {
        match self {
            Self::Committed(doc) | Self::QueuedOffline(doc) => doc,
        }
    }
}

/// 写网关
#[derive(Debug)]
pub struct WriteGateway {
    storage: Arc<StorageManager>,
    api: Arc<dyn RemoteApi>,
    network: Arc<NetworkMonitor>,
    events: EventBus,
}

impl WriteGateway {
    pub fn new(
        storage: Arc<StorageManager>,
        api: Arc<dyn RemoteApi>,
        network: Arc<NetworkMonitor>,
        events: EventBus,
    ) -> Self {
        Self {
            storage,
            api,
            network,
            events,
        }
    }

    /// 提交一次写；负载在这道边界上强制 schema 校验
    pub async fn submit(
        &self,
        payload: DocumentPayload,
        options: WriteOptions,
    ) -> Result<WriteOutcome> {
        payload.validate()?;

        if self.network.is_online().await {
            match self.submit_online(payload.clone(), &options).await {
                Ok(doc) => {
                    self.events.emit(SyncEvent::WriteCommitted {
                        collection: doc.collection(),
                        id: doc.id.clone(),
                    });
                    Ok(WriteOutcome::Committed(doc))
                }
                Err(err) if err.is_connectivity() => {
                    debug!("在线写遇到连通性失败，降级为离线写: {}", err);
                    self.queue_offline(payload, options).await
                }
                Err(err) => Err(err),
            }
        } else {
            self.queue_offline(payload, options).await
        }
    }

    /// 删除；当前设计不支持离线删除（无墓碑机制），离线时显式拒绝
    pub async fn delete(&self, collection: Collection, id: &str) -> Result<()> {
        if !self.network.is_online().await {
            return Err(MedisyncSDKError::InvalidOperation(
                "删除需要网络连接，离线删除不受支持".into(),
            ));
        }
        if is_local_id(id) {
            // 还没到过服务端的文档，本地删掉即可
            self.storage.documents().remove(collection, id).await?;
            self.emit_pending_count().await;
            return Ok(());
        }
        self.api.delete(collection, id).await?;
        self.storage.documents().remove(collection, id).await?;
        Ok(())
    }

    async fn submit_online(
        &self,
        payload: DocumentPayload,
        options: &WriteOptions,
    ) -> Result<Document> {
        let collection = payload.collection();
        let now = Utc::now();
        let store = self.storage.documents();

        let synced = match options.existing_id.as_deref() {
            // 服务端已知的文档：update
            Some(id) if !is_local_id(id) => {
                let created_at = store
                    .find_by_id(collection, id)
                    .await?
                    .map(|d| d.created_at)
                    .unwrap_or(now);
                let candidate = Document {
                    id: id.to_string(),
                    payload,
                    created_at,
                    updated_at: now,
                    sync_status: SyncStatus::Synced,
                    meta: DocumentMeta::synced(now),
                };
                let wire = self
                    .api
                    .update(collection, id, candidate.to_wire_body()?)
                    .await?;
                wire.into_document(collection, now)?
            }
            // 离线产物在线上被继续编辑：直接当场 create，临时 ID 作幂等令牌
            Some(local_id) => {
                let candidate = Document {
                    id: local_id.to_string(),
                    payload,
                    created_at: now,
                    updated_at: now,
                    sync_status: SyncStatus::Synced,
                    meta: DocumentMeta::synced(now),
                };
                let wire = self
                    .api
                    .create(collection, candidate.to_wire_body()?, local_id)
                    .await?;
                let synced = wire.into_document(collection, now)?;
                store.remove(collection, local_id).await?;
                self.emit_pending_count().await;
                synced
            }
            // 全新文档：create，幂等令牌即取一个新的临时 ID
            None => {
                let client_ref = new_local_id();
                let candidate = Document {
                    id: client_ref.clone(),
                    payload,
                    created_at: now,
                    updated_at: now,
                    sync_status: SyncStatus::Synced,
                    meta: DocumentMeta::synced(now),
                };
                let wire = self
                    .api
                    .create(collection, candidate.to_wire_body()?, &client_ref)
                    .await?;
                wire.into_document(collection, now)?
            }
        };

        store.upsert(&synced).await?;
        info!("✅ 在线写确认: {} {}", collection, synced.id);
        Ok(synced)
    }

    /// 离线路径：同一文档的重复提交复用 ID，upsert 保证不产生第二行
    async fn queue_offline(
        &self,
        payload: DocumentPayload,
        options: WriteOptions,
    ) -> Result<WriteOutcome> {
        let collection = payload.collection();
        let now = Utc::now();
        let store = self.storage.documents();

        let doc = match options.existing_id {
            Some(id) => {
                // 保留首次写入时间；updatedAt 前移到本次编辑
                let created_at = store
                    .find_by_id(collection, &id)
                    .await?
                    .map(|d| d.created_at)
                    .unwrap_or(now);
                Document {
                    id,
                    payload,
                    created_at,
                    updated_at: now,
                    sync_status: SyncStatus::Pending,
                    meta: DocumentMeta::queued(now),
                }
            }
            None => Document::new_queued(None, payload, now),
        };

        store.upsert(&doc).await?;
        info!("📦 离线保存: {} {} (待同步)", collection, doc.id);
        self.events.emit(SyncEvent::SavedOffline {
            collection,
            id: doc.id.clone(),
        });
        self.emit_pending_count().await;
        Ok(WriteOutcome::QueuedOffline(doc))
    }

    async fn emit_pending_count(&self) {
        if let Ok(count) = self.storage.pending().count_all_pending().await {
            self.events.emit(SyncEvent::PendingCountChanged { count });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_helpers::{InjectedFailure, MockRemoteApi};
    use crate::network::test_helpers::ScriptedNetworkListener;
    use crate::network::NetworkStatus;
    use crate::storage::documents::{PatientRecord, SyncStatus};
    use crate::storage::DocumentSelector;
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        storage: Arc<StorageManager>,
        api: Arc<MockRemoteApi>,
        listener: Arc<ScriptedNetworkListener>,
        network: Arc<NetworkMonitor>,
        events: EventBus,
        gateway: WriteGateway,
    }

    async fn fixture(initial: NetworkStatus) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(StorageManager::open(temp_dir.path()).await.unwrap());
        let api = Arc::new(MockRemoteApi::new());
        let listener = Arc::new(ScriptedNetworkListener::new(initial));
        let network = Arc::new(NetworkMonitor::new(listener.clone()));
        network.start().await.unwrap();
        let events = EventBus::new(64);
        let gateway = WriteGateway::new(
            storage.clone(),
            api.clone(),
            network.clone(),
            events.clone(),
        );
        Fixture {
            _temp_dir: temp_dir,
            storage,
            api,
            listener,
            network,
            events,
            gateway,
        }
    }

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
    async fn online_create_commits_and_mirrors() {
        let fx = fixture(NetworkStatus::Online).await;
        let outcome = fx
            .gateway
            .submit(patient_payload("ada"), WriteOptions::create())
            .await
            .unwrap();

        let doc = match outcome {
            WriteOutcome::Committed(doc) => doc,
            other => panic!("expected committed, got {:?}", other),
        };
        assert!(!is_local_id(&doc.id));
        assert_eq!(doc.sync_status, SyncStatus::Synced);

        let mirrored = fx
            .storage
            .documents()
            .find_by_id(Collection::Patient, &doc.id)
            .await
            .unwrap()
            .expect("online success must be mirrored locally");
        assert_eq!(mirrored.sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn offline_create_queues_with_local_id() {
        let fx = fixture(NetworkStatus::Offline).await;
        let mut rx = fx.events.subscribe();

        let outcome = fx
            .gateway
            .submit(patient_payload("ada"), WriteOptions::create())
            .await
            .unwrap();

        let doc = match outcome {
            WriteOutcome::QueuedOffline(doc) => doc,
            other => panic!("expected queued, got {:?}", other),
        };
        assert!(is_local_id(&doc.id));
        assert_eq!(doc.sync_status, SyncStatus::Pending);
        assert!(doc.meta.offline && doc.meta.pending);

        // 不碰网络
        assert_eq!(fx.api.doc_count(Collection::Patient).await, 0);

        // 「已离线保存」信号与角标更新
        match rx.recv().await.unwrap() {
            SyncEvent::SavedOffline { id, .. } => assert_eq!(id, doc.id),
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            SyncEvent::PendingCountChanged { count } => assert_eq!(count, 1),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn resubmit_with_same_id_does_not_duplicate() {
        let fx = fixture(NetworkStatus::Offline).await;
        let first = fx
            .gateway
            .submit(patient_payload("ada"), WriteOptions::create())
            .await
            .unwrap();
        let id = first.document().id.clone();

        // 同一文档重试提交
        fx.gateway
            .submit(patient_payload("ada revised"), WriteOptions::update(id.clone()))
            .await
            .unwrap();

        let all = fx
            .storage
            .documents()
            .find(Collection::Patient, &DocumentSelector::new())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        match &all[0].payload {
            DocumentPayload::Patient(r) => assert_eq!(r.name, "ada revised"),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn online_domain_rejection_surfaces_and_queues_nothing() {
        let fx = fixture(NetworkStatus::Online).await;
        fx.api
            .inject_create_failure(Some(InjectedFailure::Domain))
            .await;

        let err = fx
            .gateway
            .submit(patient_payload("ada"), WriteOptions::create())
            .await
            .unwrap_err();
        assert!(matches!(err, MedisyncSDKError::DomainRejected(_)));

        let all = fx
            .storage
            .documents()
            .find(Collection::Patient, &DocumentSelector::new())
            .await
            .unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn connectivity_failure_degrades_to_offline_queue() {
        let fx = fixture(NetworkStatus::Online).await;
        fx.api
            .inject_create_failure(Some(InjectedFailure::Network))
            .await;

        let outcome = fx
            .gateway
            .submit(patient_payload("ada"), WriteOptions::create())
            .await
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::QueuedOffline(_)));
        assert!(is_local_id(&outcome.document().id));
    }

    #[tokio::test]
    async fn schema_violation_rejected_at_the_boundary() {
        let fx = fixture(NetworkStatus::Offline).await;
        let err = fx
            .gateway
            .submit(patient_payload(""), WriteOptions::create())
            .await
            .unwrap_err();
        assert!(matches!(err, MedisyncSDKError::SchemaViolation(_)));
    }

    #[tokio::test]
    async fn offline_delete_is_rejected() {
        let fx = fixture(NetworkStatus::Offline).await;
        let err = fx
            .gateway
            .delete(Collection::Patient, "srv_1")
            .await
            .unwrap_err();
        assert!(matches!(err, MedisyncSDKError::InvalidOperation(_)));

        // 网络恢复后允许删除
        fx.listener.flip(NetworkStatus::Online);
        loop {
            if fx.network.is_online().await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        fx.gateway.delete(Collection::Patient, "srv_1").await.unwrap();
    }
}
