//! 存储模块 - 离线优先同步核心的数据持久化层
//!
//! 分层设计：
//! - StorageManager: 统一的存储管理器，显式构造、显式关闭（无全局单例）
//! - DocumentStore: 每集合一张表的 SQLite 文档库，schema 校验后落库
//! - KvStore / CheckpointStore: sled 键值存储，存放独立于文档库存活的同步水位
//! - PendingTracker: 挂起写查询面

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{MedisyncSDKError, Result};

pub mod checkpoint;
pub mod document_store;
pub mod documents;
pub mod kv;
pub mod pending;

pub use checkpoint::{CheckpointStore, SyncCheckpoint};
pub use document_store::{DocumentSelector, DocumentStore, SCHEMA_VERSION};
pub use documents::*;
pub use kv::KvStore;
pub use pending::PendingTracker;

/// 存储管理器 - 文档库 + KV + 检查点的统一入口
///
/// 生命周期显式：`open` 一次，`close` 一次，由 SDK 持有并注入
/// 写网关、复制引擎与缓存预热器。
#[derive(Debug)]
pub struct StorageManager {
    #[allow(dead_code)]
    base_path: PathBuf,
    documents: Arc<DocumentStore>,
    kv: Arc<KvStore>,
    checkpoints: CheckpointStore,
    pending: PendingTracker,
}

impl StorageManager {
    /// 打开存储层；schema 不兼容时文档库 wipe 重建并连同检查点一起重置
    pub async fn open(base_path: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(base_path)
            .await
            .map_err(|e| MedisyncSDKError::IO(format!("创建存储目录失败: {}", e)))?;

        let (documents, wiped) = DocumentStore::open(base_path).await?;
        let documents = Arc::new(documents);
        let kv = Arc::new(KvStore::open(base_path).await?);
        let checkpoints = CheckpointStore::new(kv.clone());

        if wiped {
            // 空库配旧水位永远补不齐，重建后强制全量重拉
            warn!("⚠️ schema 重建完成，重置全部拉取检查点");
            checkpoints.clear_all().await?;
        }

        let pending = PendingTracker::new(documents.clone());

        info!("✅ 存储层就绪: {:?}", base_path);

        Ok(Self {
            base_path: base_path.to_path_buf(),
            documents,
            kv,
            checkpoints,
            pending,
        })
    }

    pub fn documents(&self) -> &Arc<DocumentStore> {
        &self.documents
    }

    pub fn kv(&self) -> &Arc<KvStore> {
        &self.kv
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn pending(&self) -> &PendingTracker {
        &self.pending
    }

    /// 清空文档缓存（用户主动操作）。检查点存活，预热负责回填。
    pub async fn clear_cache(&self) -> Result<()> {
        self.documents.clear_all().await
    }

    /// 关闭存储层（KV 刷盘；SQLite 连接随 drop 关闭）
    pub async fn close(&self) -> Result<()> {
        self.kv.flush().await?;
        info!("存储层已关闭");
        Ok(())
    }
}
