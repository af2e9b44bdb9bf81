//! 同步检查点存储 - 每个集合一条 KV 记录
//!
//! 格式：`sync_checkpoint:{collection}`，值为 [`SyncCheckpoint`]。
//! 有意存放在文档库之外：文档缓存被清空时检查点独立存活，
//! 只有 schema 不兼容触发的重建才会连同检查点一起重置（否则空库配旧水位永远补不齐）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::storage::documents::Collection;
use crate::storage::kv::{keys, KvStore};

/// 单个集合的拉取检查点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCheckpoint {
    pub collection: Collection,
    /// 最近一次成功 pull 的时刻
    pub last_sync: DateTime<Utc>,
    /// 已拉取到的 `updatedAt` 水位；None 表示尚未拉过（全量）
    #[serde(default)]
    pub checkpoint: Option<DateTime<Utc>>,
}

/// 检查点存取（游标只进不退，由复制引擎保证）
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    kv: Arc<KvStore>,
}

impl CheckpointStore {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    fn key(collection: Collection) -> String {
        format!("{}:{}", keys::SYNC_CHECKPOINT, collection.as_str())
    }

    pub async fn get(&self, collection: Collection) -> Result<Option<SyncCheckpoint>> {
        self.kv.get(&Self::key(collection)).await
    }

    /// 写入新的水位
    pub async fn advance(
        &self,
        collection: Collection,
        checkpoint: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let record = SyncCheckpoint {
            collection,
            last_sync: now,
            checkpoint: Some(checkpoint),
        };
        self.kv.set(&Self::key(collection), &record).await
    }

    /// 仅更新 last_sync（本轮 pull 无新数据，水位不动）
    pub async fn touch(&self, collection: Collection, now: DateTime<Utc>) -> Result<()> {
        let record = match self.get(collection).await? {
            Some(mut existing) => {
                existing.last_sync = now;
                existing
            }
            None => SyncCheckpoint {
                collection,
                last_sync: now,
                checkpoint: None,
            },
        };
        self.kv.set(&Self::key(collection), &record).await
    }

    pub async fn clear(&self, collection: Collection) -> Result<()> {
        self.kv.delete(&Self::key(collection)).await
    }

    /// 全部重置（schema 重建后强制全量重拉）
    pub async fn clear_all(&self) -> Result<()> {
        for &collection in crate::storage::documents::ALL_COLLECTIONS {
            self.clear(collection).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn checkpoint_key_format() {
        assert_eq!(
            CheckpointStore::key(Collection::Appointment),
            "sync_checkpoint:appointment"
        );
        assert_eq!(
            CheckpointStore::key(Collection::MedicalRecord),
            "sync_checkpoint:medical_record"
        );
    }

    #[tokio::test]
    async fn advance_and_touch() {
        let temp_dir = TempDir::new().unwrap();
        let kv = Arc::new(KvStore::open(temp_dir.path()).await.unwrap());
        let store = CheckpointStore::new(kv);

        assert!(store.get(Collection::Patient).await.unwrap().is_none());

        let watermark: DateTime<Utc> = "2025-03-01T10:00:00Z".parse().unwrap();
        let now: DateTime<Utc> = "2025-03-01T10:05:00Z".parse().unwrap();
        store
            .advance(Collection::Patient, watermark, now)
            .await
            .unwrap();

        let cp = store.get(Collection::Patient).await.unwrap().unwrap();
        assert_eq!(cp.checkpoint, Some(watermark));
        assert_eq!(cp.last_sync, now);

        // touch 不动水位
        let later: DateTime<Utc> = "2025-03-01T11:00:00Z".parse().unwrap();
        store.touch(Collection::Patient, later).await.unwrap();
        let cp = store.get(Collection::Patient).await.unwrap().unwrap();
        assert_eq!(cp.checkpoint, Some(watermark));
        assert_eq!(cp.last_sync, later);

        store.clear_all().await.unwrap();
        assert!(store.get(Collection::Patient).await.unwrap().is_none());
    }
}
