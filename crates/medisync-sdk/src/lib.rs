//! Medisync SDK - 医院管理应用的离线优先同步核心
//!
//! 本 SDK 让多角色医院管理应用在断网时照常读写，重连后自动与远端
//! 系统对账，包括：
//! - 📦 本地文档库：每集合一张表、schema 校验、页面刷新后数据仍在
//! - 📡 网络状态监控与重连触发的自动排水
//! - 🔄 复制引擎：检查点增量 pull + 挂起写 push，集合内严格串行
//! - ⚖️ 冲突解决：按 `updatedAt` 最后写者胜，平局偏向服务端
//! - 🔥 按角色批量预热本地缓存
//! - ⚙️ 事件总线：离线保存 / 同步进度 / 挂起角标的统一信号面
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use medisync_sdk::{MedisyncConfig, MedisyncSDK, WriteOptions};
//! use medisync_sdk::{AppointmentPriority, AppointmentRecord, AppointmentStatus, DocumentPayload};
//! # use medisync_sdk::network::NetworkStatusListener;
//! # fn platform_listener() -> Arc<dyn NetworkStatusListener> { unimplemented!() }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MedisyncConfig::builder()
//!         .data_dir("/path/to/data")
//!         .api_base_url("https://api.example.com")
//!         .build();
//!
//!     // 初始化 SDK（平台层提供连通性信号源）
//!     let sdk = MedisyncSDK::initialize(config, platform_listener()).await?;
//!
//!     // 提交一次写：在线直达服务端，离线自动排队
//!     let outcome = sdk.submit(
//!         DocumentPayload::Appointment(AppointmentRecord {
//!             patient_id: "p1".into(),
//!             doctor_id: "d1".into(),
//!             hospital_id: "h1".into(),
//!             appointment_date: "2025-03-05".into(),
//!             status: AppointmentStatus::Scheduled,
//!             priority: AppointmentPriority::Normal,
//!             time_slot: None,
//!             reason: None,
//!         }),
//!         WriteOptions::create(),
//!     ).await?;
//!     println!("written: {}", outcome.document().id);
//!
//!     // 关闭 SDK
//!     sdk.shutdown().await?;
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod api;
pub mod error;
pub mod events;
pub mod gateway;
pub mod network;
pub mod sdk;
pub mod storage;
pub mod sync;

// 重新导出核心类型，方便使用
pub use error::{MedisyncSDKError, Result};
pub use events::{EventBus, SyncEvent};
pub use gateway::{WriteGateway, WriteOptions, WriteOutcome};
pub use network::{NetworkMonitor, NetworkStatus, NetworkStatusEvent, NetworkStatusListener};
pub use sdk::{MedisyncConfig, MedisyncConfigBuilder, MedisyncSDK};
pub use storage::{
    is_local_id, new_local_id, AppointmentPriority, AppointmentRecord, AppointmentStatus,
    BillRecord, BillStatus, CheckpointStore, Collection, Document, DocumentMeta, DocumentPayload,
    DocumentSelector, DocumentStore, DoctorRecord, HospitalRecord, KvStore, MedicalRecordEntry,
    PatientRecord, PendingTracker, StorageManager, SyncCheckpoint, SyncStatus, ALL_COLLECTIONS,
    LOCAL_ID_PREFIX,
};
pub use sync::{
    resolve, CacheWarmer, CollectionFailure, CollectionSyncOutcome, ReplicationEngine, Resolution,
    RetryPolicy, SyncFailureReason, SyncReport, SyncScheduler, SyncState, WarmOutcome, WarmScope,
};
pub use api::{RemoteApi, RestApiClient};
