//! 挂起写跟踪 - 「还有什么没到服务端」的查询面
//!
//! 不引入独立存储：挂起状态就是文档库里的 `sync_status` / `meta.pending`，
//! 本模块只是它们之上的查询与标记接口。

use std::sync::Arc;
use chrono::Utc;

use crate::error::Result;
use crate::storage::document_store::{DocumentSelector, DocumentStore};
use crate::storage::documents::{Collection, Document, SyncStatus, ALL_COLLECTIONS};

/// 挂起写跟踪器
#[derive(Debug, Clone)]
pub struct PendingTracker {
    store: Arc<DocumentStore>,
}

impl PendingTracker {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }

    /// 某集合的全部挂起文档（`meta.pending = true`，等价于 `sync_status != synced`）
    pub async fn pending_in(&self, collection: Collection) -> Result<Vec<Document>> {
        self.store
            .find(collection, &DocumentSelector::new().with_pending(true))
            .await
    }

    /// push 选取：pending + failed，但跳过终态失败（业务拒绝不无限重试）
    pub async fn push_eligible(&self, collection: Collection) -> Result<Vec<Document>> {
        self.store
            .find(
                collection,
                &DocumentSelector::new()
                    .with_status_in(vec![SyncStatus::Pending, SyncStatus::Failed])
                    .excluding_terminal(),
            )
            .await
    }

    /// 清除挂起标记并盖章 `meta.syncedAt`
    pub async fn mark_synced(&self, collection: Collection, id: &str) -> Result<bool> {
        self.store.mark_synced(collection, id, Utc::now()).await
    }

    /// 标记失败；`terminal` 表示业务拒绝，不再自动重试
    pub async fn mark_failed(&self, collection: Collection, id: &str, terminal: bool) -> Result<bool> {
        self.store.mark_failed(collection, id, terminal).await
    }

    /// 全集合挂起总数（驱动 UI 角标，不参与同步决策）
    pub async fn count_all_pending(&self) -> Result<u64> {
        let mut total = 0u64;
        for &collection in ALL_COLLECTIONS {
            total += self
                .store
                .count(collection, &DocumentSelector::new().with_pending(true))
                .await?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::documents::{Document, DocumentPayload, PatientRecord};
    use tempfile::TempDir;

    fn queued_patient(name: &str) -> Document {
        Document::new_queued(
            None,
            DocumentPayload::Patient(PatientRecord {
                name: name.into(),
                email: format!("{}@example.com", name),
                hospital_id: "h1".into(),
                phone: None,
                date_of_birth: None,
                blood_group: None,
                address: None,
            }),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn pending_count_tracks_sync_progress() {
        let temp_dir = TempDir::new().unwrap();
        let (store, _) = DocumentStore::open(temp_dir.path()).await.unwrap();
        let store = Arc::new(store);
        let tracker = PendingTracker::new(store.clone());

        let docs: Vec<Document> = (0..3).map(|i| queued_patient(&format!("p{}", i))).collect();
        for doc in &docs {
            store.upsert(doc).await.unwrap();
        }
        assert_eq!(tracker.count_all_pending().await.unwrap(), 3);

        // 同步掉两条，角标应为 1
        tracker
            .mark_synced(Collection::Patient, &docs[0].id)
            .await
            .unwrap();
        tracker
            .mark_synced(Collection::Patient, &docs[1].id)
            .await
            .unwrap();
        assert_eq!(tracker.count_all_pending().await.unwrap(), 1);

        let remaining = tracker.pending_in(Collection::Patient).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, docs[2].id);
    }

    #[tokio::test]
    async fn terminal_failures_stay_out_of_push_but_in_badge() {
        let temp_dir = TempDir::new().unwrap();
        let (store, _) = DocumentStore::open(temp_dir.path()).await.unwrap();
        let store = Arc::new(store);
        let tracker = PendingTracker::new(store.clone());

        let doc = queued_patient("p1");
        store.upsert(&doc).await.unwrap();
        tracker
            .mark_failed(Collection::Patient, &doc.id, true)
            .await
            .unwrap();

        // 角标继续显示（用户能看到有东西没同步成功）
        assert_eq!(tracker.count_all_pending().await.unwrap(), 1);
        // 但 push 不再选取
        assert!(tracker
            .push_eligible(Collection::Patient)
            .await
            .unwrap()
            .is_empty());
    }
}
