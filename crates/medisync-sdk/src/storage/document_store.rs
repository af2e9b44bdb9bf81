//! 本地文档库 - 每个集合一张 SQLite 表，schema 校验后落库
//!
//! 本模块提供：
//! - WAL 模式的持久化文档存储，按 id 幂等 upsert
//! - 等值选择器查询（sync_status / meta.pending / 外键列）
//! - schema 版本检测：不兼容时告警后 wipe 重建（有意不做字段级迁移）
//!
//! 连接由异步互斥锁保护，所有访问路径串行化；WAL 让同一数据目录上的
//! 多个 SDK 实例读写互不破坏。

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{MedisyncSDKError, Result};
use crate::storage::documents::{
    Collection, Document, DocumentMeta, DocumentPayload, SyncStatus, ALL_COLLECTIONS,
};

/// 当前本地库 schema 版本；与持久化的 `PRAGMA user_version` 比对
pub const SCHEMA_VERSION: i32 = 1;

fn ts_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn ts_from_sql(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MedisyncSDKError::Database(format!("损坏的时间戳 `{}`: {}", raw, e)))
}

/// 等值选择器 - 覆盖挂起查询、复制引擎选取和按角色过滤所需的字段
#[derive(Debug, Default, Clone)]
pub struct DocumentSelector {
    pub sync_status_in: Option<Vec<SyncStatus>>,
    pub pending: Option<bool>,
    /// 跳过被标记为终态失败的文档（push 选取用）
    pub exclude_terminal: bool,
    pub patient_id: Option<String>,
    pub doctor_id: Option<String>,
    pub hospital_id: Option<String>,
}

impl DocumentSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status_in(mut self, statuses: Vec<SyncStatus>) -> Self {
        self.sync_status_in = Some(statuses);
        self
    }

    pub fn with_pending(mut self, pending: bool) -> Self {
        self.pending = Some(pending);
        self
    }

    pub fn excluding_terminal(mut self) -> Self {
        self.exclude_terminal = true;
        self
    }

    pub fn with_patient(mut self, patient_id: impl Into<String>) -> Self {
        self.patient_id = Some(patient_id.into());
        self
    }

    pub fn with_doctor(mut self, doctor_id: impl Into<String>) -> Self {
        self.doctor_id = Some(doctor_id.into());
        self
    }

    pub fn with_hospital(mut self, hospital_id: impl Into<String>) -> Self {
        self.hospital_id = Some(hospital_id.into());
        self
    }

    /// 生成 WHERE 子句与参数（全部为等值条件）
    fn to_where(&self) -> (String, Vec<Box<dyn rusqlite::types::ToSql + Send>>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::types::ToSql + Send>> = Vec::new();

        if let Some(statuses) = &self.sync_status_in {
            let placeholders = vec!["?"; statuses.len()].join(", ");
            clauses.push(format!("sync_status IN ({})", placeholders));
            for status in statuses {
                params.push(Box::new(status.as_str().to_string()));
            }
        }
        if let Some(pending) = self.pending {
            clauses.push("meta_pending = ?".to_string());
            params.push(Box::new(pending as i64));
        }
        if self.exclude_terminal {
            clauses.push("meta_terminal = 0".to_string());
        }
        if let Some(patient_id) = &self.patient_id {
            clauses.push("patient_id = ?".to_string());
            params.push(Box::new(patient_id.clone()));
        }
        if let Some(doctor_id) = &self.doctor_id {
            clauses.push("doctor_id = ?".to_string());
            params.push(Box::new(doctor_id.clone()));
        }
        if let Some(hospital_id) = &self.hospital_id {
            clauses.push("hospital_id = ?".to_string());
            params.push(Box::new(hospital_id.clone()));
        }

        if clauses.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), params)
        }
    }
}

/// 本地文档库
#[derive(Debug)]
pub struct DocumentStore {
    #[allow(dead_code)]
    db_path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl DocumentStore {
    /// 打开文档库；返回的 bool 表示是否因 schema 不兼容触发了 wipe 重建
    /// （调用方据此重置拉取检查点，强制全量重拉）。
    pub async fn open(base_path: &Path) -> Result<(Self, bool)> {
        tokio::fs::create_dir_all(base_path)
            .await
            .map_err(|e| MedisyncSDKError::IO(format!("创建文档库目录失败: {}", e)))?;

        let db_path = base_path.join("documents.db");
        let conn = Connection::open(&db_path)
            .map_err(|e| MedisyncSDKError::Database(format!("打开文档库失败: {}", e)))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| MedisyncSDKError::Database(format!("设置 WAL 模式失败: {}", e)))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| MedisyncSDKError::Database(format!("设置同步模式失败: {}", e)))?;

        let persisted_version: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(|e| MedisyncSDKError::Database(format!("读取 schema 版本失败: {}", e)))?;

        let mut wiped = false;
        if persisted_version != 0 && persisted_version != SCHEMA_VERSION {
            // 有意的简化：不做字段级迁移，告警后整体重建；检查点由调用方一并重置
            warn!(
                "⚠️ 本地文档库 schema 版本不兼容（持久化 v{}，当前 v{}），即将清空重建",
                persisted_version, SCHEMA_VERSION
            );
            Self::drop_all_tables(&conn)?;
            wiped = true;
        }

        Self::create_tables(&conn)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(|e| MedisyncSDKError::Database(format!("写入 schema 版本失败: {}", e)))?;

        info!("✅ 文档库就绪: {:?} (schema v{})", db_path, SCHEMA_VERSION);

        Ok((
            Self {
                db_path,
                conn: Arc::new(Mutex::new(conn)),
            },
            wiped,
        ))
    }

    fn create_tables(conn: &Connection) -> Result<()> {
        for &collection in ALL_COLLECTIONS {
            let table = collection.table_name();
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {t} (
                    id TEXT PRIMARY KEY,
                    payload TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    sync_status TEXT NOT NULL,
                    meta_offline INTEGER NOT NULL DEFAULT 0,
                    meta_pending INTEGER NOT NULL DEFAULT 0,
                    meta_created_at TEXT NOT NULL,
                    meta_synced_at TEXT,
                    meta_terminal INTEGER NOT NULL DEFAULT 0,
                    patient_id TEXT,
                    doctor_id TEXT,
                    hospital_id TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_{t}_sync_status ON {t}(sync_status);
                CREATE INDEX IF NOT EXISTS idx_{t}_pending ON {t}(meta_pending);
                CREATE INDEX IF NOT EXISTS idx_{t}_updated_at ON {t}(updated_at);
                CREATE INDEX IF NOT EXISTS idx_{t}_hospital ON {t}(hospital_id);
                CREATE INDEX IF NOT EXISTS idx_{t}_patient ON {t}(patient_id);
                CREATE INDEX IF NOT EXISTS idx_{t}_doctor ON {t}(doctor_id);",
                t = table
            ))
            .map_err(|e| {
                MedisyncSDKError::Database(format!("创建集合表 {} 失败: {}", table, e))
            })?;
        }
        Ok(())
    }

    fn drop_all_tables(conn: &Connection) -> Result<()> {
        for &collection in ALL_COLLECTIONS {
            conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", collection.table_name()))
                .map_err(|e| {
                    MedisyncSDKError::Database(format!(
                        "删除集合表 {} 失败: {}",
                        collection.table_name(),
                        e
                    ))
                })?;
        }
        Ok(())
    }

    /// 幂等 upsert：id 不存在则插入，存在则整行替换；落库前强制 schema 校验
    pub async fn upsert(&self, doc: &Document) -> Result<()> {
        doc.payload.validate()?;
        let collection = doc.collection();
        let table = collection.table_name();
        let payload_json = serde_json::to_string(&doc.payload)
            .map_err(|e| MedisyncSDKError::Serialization(format!("序列化负载失败: {}", e)))?;

        let conn = self.conn.lock().await;
        conn.execute(
            &format!(
                "INSERT INTO {t} (id, payload, created_at, updated_at, sync_status,
                                  meta_offline, meta_pending, meta_created_at, meta_synced_at, meta_terminal,
                                  patient_id, doctor_id, hospital_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(id) DO UPDATE SET
                    payload = excluded.payload,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at,
                    sync_status = excluded.sync_status,
                    meta_offline = excluded.meta_offline,
                    meta_pending = excluded.meta_pending,
                    meta_created_at = excluded.meta_created_at,
                    meta_synced_at = excluded.meta_synced_at,
                    meta_terminal = excluded.meta_terminal,
                    patient_id = excluded.patient_id,
                    doctor_id = excluded.doctor_id,
                    hospital_id = excluded.hospital_id",
                t = table
            ),
            params![
                doc.id,
                payload_json,
                ts_to_sql(doc.created_at),
                ts_to_sql(doc.updated_at),
                doc.sync_status.as_str(),
                doc.meta.offline as i64,
                doc.meta.pending as i64,
                ts_to_sql(doc.meta.created_at),
                doc.meta.synced_at.map(ts_to_sql),
                doc.meta.terminal_failure as i64,
                doc.payload.patient_id(),
                doc.payload.doctor_id(),
                doc.payload.hospital_id(),
            ],
        )
        .map_err(|e| MedisyncSDKError::Database(format!("upsert 到 {} 失败: {}", table, e)))?;
        Ok(())
    }

    /// 按 id 查找
    pub async fn find_by_id(&self, collection: Collection, id: &str) -> Result<Option<Document>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} WHERE id = ?1",
            Self::COLUMNS,
            collection.table_name()
        ))?;
        stmt.query_row(params![id], Self::row_to_document)
            .optional()
            .map_err(|e| MedisyncSDKError::Database(format!("按 id 查询失败: {}", e)))?
            .transpose()
    }

    /// 选择器查询，按 `updated_at` 升序返回
    pub async fn find(
        &self,
        collection: Collection,
        selector: &DocumentSelector,
    ) -> Result<Vec<Document>> {
        let (where_clause, where_params) = selector.to_where();
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {}{} ORDER BY updated_at ASC",
            Self::COLUMNS,
            collection.table_name(),
            where_clause
        ))?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(where_params.iter().map(|p| p.as_ref())),
            Self::row_to_document,
        )?;

        let mut documents = Vec::new();
        for row in rows {
            documents.push(row??);
        }
        Ok(documents)
    }

    /// 选择器计数（UI 角标等只需要数量的场景，避免整行反序列化）
    pub async fn count(&self, collection: Collection, selector: &DocumentSelector) -> Result<u64> {
        let (where_clause, where_params) = selector.to_where();
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {}{}",
                collection.table_name(),
                where_clause
            ),
            rusqlite::params_from_iter(where_params.iter().map(|p| p.as_ref())),
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// 硬删除；返回是否确实删除了一行
    pub async fn remove(&self, collection: Collection, id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let affected = conn
            .execute(
                &format!("DELETE FROM {} WHERE id = ?1", collection.table_name()),
                params![id],
            )
            .map_err(|e| MedisyncSDKError::Database(format!("删除文档失败: {}", e)))?;
        Ok(affected > 0)
    }

    /// 标记为已同步并盖章 synced_at
    pub async fn mark_synced(
        &self,
        collection: Collection,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let affected = conn.execute(
            &format!(
                "UPDATE {} SET sync_status = ?1, meta_pending = 0, meta_offline = 0,
                        meta_terminal = 0, meta_synced_at = ?2 WHERE id = ?3",
                collection.table_name()
            ),
            params![SyncStatus::Synced.as_str(), ts_to_sql(now), id],
        )?;
        Ok(affected > 0)
    }

    /// 标记为失败；`terminal` 为真表示业务拒绝，push 查询不再选中
    pub async fn mark_failed(&self, collection: Collection, id: &str, terminal: bool) -> Result<bool> {
        let conn = self.conn.lock().await;
        let affected = conn.execute(
            &format!(
                "UPDATE {} SET sync_status = ?1, meta_terminal = ?2 WHERE id = ?3",
                collection.table_name()
            ),
            params![SyncStatus::Failed.as_str(), terminal as i64, id],
        )?;
        Ok(affected > 0)
    }

    /// 清空单个集合
    pub async fn clear_collection(&self, collection: Collection) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(&format!("DELETE FROM {}", collection.table_name()), [])
            .map_err(|e| MedisyncSDKError::Database(format!("清空集合失败: {}", e)))?;
        Ok(())
    }

    /// 清空全部集合（缓存清理操作；检查点不在本库，保持不动）
    pub async fn clear_all(&self) -> Result<()> {
        for &collection in ALL_COLLECTIONS {
            self.clear_collection(collection).await?;
        }
        Ok(())
    }

    const COLUMNS: &'static str = "id, payload, created_at, updated_at, sync_status, \
         meta_offline, meta_pending, meta_created_at, meta_synced_at, meta_terminal";

    fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Document>> {
        let id: String = row.get(0)?;
        let payload_json: String = row.get(1)?;
        let created_at: String = row.get(2)?;
        let updated_at: String = row.get(3)?;
        let sync_status: String = row.get(4)?;
        let meta_offline: i64 = row.get(5)?;
        let meta_pending: i64 = row.get(6)?;
        let meta_created_at: String = row.get(7)?;
        let meta_synced_at: Option<String> = row.get(8)?;
        let meta_terminal: i64 = row.get(9)?;

        // 行内容的解析错误不映射为 rusqlite 错误，原样上抛给调用者
        Ok((|| -> Result<Document> {
            let payload: DocumentPayload = serde_json::from_str(&payload_json)
                .map_err(|e| MedisyncSDKError::Database(format!("损坏的负载列: {}", e)))?;
            Ok(Document {
                id,
                payload,
                created_at: ts_from_sql(&created_at)?,
                updated_at: ts_from_sql(&updated_at)?,
                sync_status: SyncStatus::parse(&sync_status)?,
                meta: DocumentMeta {
                    offline: meta_offline != 0,
                    pending: meta_pending != 0,
                    created_at: ts_from_sql(&meta_created_at)?,
                    synced_at: meta_synced_at.as_deref().map(ts_from_sql).transpose()?,
                    terminal_failure: meta_terminal != 0,
                },
            })
        })())
    }
}
