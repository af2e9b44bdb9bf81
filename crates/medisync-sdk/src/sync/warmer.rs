//! 缓存预热 - 按角色批量预拉本地缓存
//!
//! 职责边界：不在写路径上，与复制引擎正交。给定角色及其作用域 ID，
//! 对相关集合各发一次带服务端过滤条件的批量拉取，结果全部按 synced upsert。
//!
//! 硬约束：
//! - 同一作用域的并发预热互斥（可重入保护），后来者直接返回
//! - 永远不在拉取成功前清空既有缓存：失败时用户手里还有旧数据可用

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::RemoteApi;
use crate::error::Result;
use crate::storage::documents::Collection;
use crate::storage::kv::keys;
use crate::storage::StorageManager;
use crate::sync::resolver::{resolve, Resolution};

/// 角色作用域 - 决定预热哪些集合、带什么过滤条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmScope {
    /// 医院管理员：本院的患者、医生、预约、账单
    HospitalAdmin { hospital_id: String },
    /// 医生：自己的预约与病历，本院患者
    Doctor {
        doctor_id: String,
        hospital_id: String,
    },
    /// 患者：自己的预约、账单、病历
    Patient { patient_id: String },
}

impl WarmScope {
    /// 可重入保护的键
    fn guard_key(&self) -> String {
        match self {
            Self::HospitalAdmin { hospital_id } => format!("hospital_admin:{}", hospital_id),
            Self::Doctor { doctor_id, .. } => format!("doctor:{}", doctor_id),
            Self::Patient { patient_id } => format!("patient:{}", patient_id),
        }
    }

    /// 预热计划：(集合, 服务端过滤条件) 列表
    fn plan(&self) -> Vec<(Collection, Vec<(String, String)>)> {
        fn filter(key: &str, value: &str) -> Vec<(String, String)> {
            vec![(key.to_string(), value.to_string())]
        }

        match self {
            Self::HospitalAdmin { hospital_id } => vec![
                (Collection::Hospital, filter("id", hospital_id)),
                (Collection::Patient, filter("hospitalId", hospital_id)),
                (Collection::Doctor, filter("hospitalId", hospital_id)),
                (Collection::Appointment, filter("hospitalId", hospital_id)),
                (Collection::Bill, filter("hospitalId", hospital_id)),
            ],
            Self::Doctor {
                doctor_id,
                hospital_id,
            } => vec![
                (Collection::Hospital, filter("id", hospital_id)),
                (Collection::Patient, filter("hospitalId", hospital_id)),
                (Collection::Appointment, filter("doctorId", doctor_id)),
                (Collection::MedicalRecord, filter("doctorId", doctor_id)),
            ],
            Self::Patient { patient_id } => vec![
                (Collection::Appointment, filter("patientId", patient_id)),
                (Collection::Bill, filter("patientId", patient_id)),
                (Collection::MedicalRecord, filter("patientId", patient_id)),
            ],
        }
    }
}

/// 预热结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmOutcome {
    /// 本次预热完成，落库条数
    Completed { upserted: usize },
    /// 同一作用域已有预热在跑，本次直接放弃
    AlreadyRunning,
}

/// 缓存预热器
#[derive(Debug)]
pub struct CacheWarmer {
    storage: Arc<StorageManager>,
    api: Arc<dyn RemoteApi>,
    in_flight: Mutex<HashSet<String>>,
}

impl CacheWarmer {
    pub fn new(storage: Arc<StorageManager>, api: Arc<dyn RemoteApi>) -> Self {
        Self {
            storage,
            api,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// 执行一次作用域预热
    pub async fn warm(&self, scope: &WarmScope) -> Result<WarmOutcome> {
        let key = scope.guard_key();
        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(key.clone()) {
                debug!("预热已在进行中，跳过: {}", key);
                return Ok(WarmOutcome::AlreadyRunning);
            }
        }

        let result = self.run(scope).await;
        self.in_flight.lock().await.remove(&key);

        match result {
            Ok(upserted) => {
                self.storage
                    .kv()
                    .set(
                        &format!("{}:{}", keys::WARM_COMPLETED, key),
                        &Utc::now(),
                    )
                    .await?;
                info!("🔥 缓存预热完成 {}: {} 条", key, upserted);
                Ok(WarmOutcome::Completed { upserted })
            }
            Err(err) => {
                // 既有缓存原样保留，失败只是少了新数据
                warn!("缓存预热失败 {}: {}", key, err);
                Err(err)
            }
        }
    }

    async fn run(&self, scope: &WarmScope) -> Result<usize> {
        let store = self.storage.documents();
        let mut upserted = 0usize;

        for (collection, filters) in scope.plan() {
            let wires = self.api.fetch_filtered(collection, &filters).await?;
            for wire in wires {
                let incoming = wire.into_document(collection, Utc::now())?;
                // 与 pull 同一条规则：挂起的本地修改按 LWW 裁决，不被预热冲掉
                match store.find_by_id(collection, &incoming.id).await? {
                    Some(local) if local.is_pending() => {
                        if resolve(&local, &incoming) == Resolution::ServerWins {
                            store.upsert(&incoming).await?;
                            upserted += 1;
                        }
                    }
                    Some(local) if local.updated_at > incoming.updated_at => {}
                    _ => {
                        store.upsert(&incoming).await?;
                        upserted += 1;
                    }
                }
            }
        }
        Ok(upserted)
    }

    #[cfg(test)]
    pub(crate) async fn pretend_in_flight(&self, scope: &WarmScope) {
        self.in_flight.lock().await.insert(scope.guard_key());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_helpers::{InjectedFailure, MockRemoteApi};
    use crate::storage::documents::SyncStatus;
    use crate::storage::DocumentSelector;
    use tempfile::TempDir;

    fn patient_json(id: &str, hospital_id: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "createdAt": "2025-03-01T08:00:00Z",
            "updatedAt": "2025-03-01T08:00:00Z",
            "name": format!("patient {}", id),
            "email": format!("{}@example.com", id),
            "hospitalId": hospital_id
        })
    }

    async fn fixture() -> (TempDir, Arc<StorageManager>, Arc<MockRemoteApi>, CacheWarmer) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(StorageManager::open(temp_dir.path()).await.unwrap());
        let api = Arc::new(MockRemoteApi::new());
        let warmer = CacheWarmer::new(storage.clone(), api.clone());
        (temp_dir, storage, api, warmer)
    }

    #[tokio::test]
    async fn warm_populates_only_scoped_documents() {
        let (_guard, storage, api, warmer) = fixture().await;
        api.seed(Collection::Patient, patient_json("p1", "h1")).await;
        api.seed(Collection::Patient, patient_json("p2", "h1")).await;
        // 别家医院的患者不在作用域内
        api.seed(Collection::Patient, patient_json("p3", "h2")).await;

        let outcome = warmer
            .warm(&WarmScope::HospitalAdmin {
                hospital_id: "h1".into(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, WarmOutcome::Completed { upserted: 2 });

        let cached = storage
            .documents()
            .find(Collection::Patient, &DocumentSelector::new())
            .await
            .unwrap();
        assert_eq!(cached.len(), 2);
        assert!(cached.iter().all(|d| d.sync_status == SyncStatus::Synced));
    }

    #[tokio::test]
    async fn overlapping_warm_for_same_scope_is_skipped() {
        let (_guard, _storage, _api, warmer) = fixture().await;
        let scope = WarmScope::Patient {
            patient_id: "p1".into(),
        };
        warmer.pretend_in_flight(&scope).await;

        let outcome = warmer.warm(&scope).await.unwrap();
        assert_eq!(outcome, WarmOutcome::AlreadyRunning);

        // 不同作用域互不影响
        let other = WarmScope::Patient {
            patient_id: "p2".into(),
        };
        assert!(matches!(
            warmer.warm(&other).await.unwrap(),
            WarmOutcome::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn failed_warm_keeps_existing_cache() {
        let (_guard, storage, api, warmer) = fixture().await;

        // 先预热一次成功
        api.seed(Collection::Patient, patient_json("p1", "h1")).await;
        warmer
            .warm(&WarmScope::HospitalAdmin {
                hospital_id: "h1".into(),
            })
            .await
            .unwrap();

        // 第二次网络挂了：既有缓存必须原样保留
        api.inject_filtered_failure(Some(InjectedFailure::Network))
            .await;
        let err = warmer
            .warm(&WarmScope::HospitalAdmin {
                hospital_id: "h1".into(),
            })
            .await
            .unwrap_err();
        assert!(err.is_connectivity());

        let cached = storage
            .documents()
            .find(Collection::Patient, &DocumentSelector::new())
            .await
            .unwrap();
        assert_eq!(cached.len(), 1);

        // 失败后守卫释放，恢复网络可以再跑
        api.inject_filtered_failure(None).await;
        assert!(matches!(
            warmer
                .warm(&WarmScope::HospitalAdmin {
                    hospital_id: "h1".into()
                })
                .await
                .unwrap(),
            WarmOutcome::Completed { .. }
        ));
    }
}
