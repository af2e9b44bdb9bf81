//! 文档模型 - 各集合的文档信封与强类型负载
//!
//! 本模块提供：
//! - Collection 受控枚举（patient / doctor / appointment / hospital / bill / medical_record）
//! - Document 信封：id + 负载 + 时间戳 + 同步状态 + 本地元数据
//! - DocumentPayload：每个集合一个带标签的强类型负载变体，写入前统一校验
//! - 离线临时 ID 约定（`local_` 前缀），push 逻辑依赖该约定区分 create/update

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{MedisyncSDKError, Result};

/// 离线创建的文档使用的保留 ID 前缀；服务端 ID 永远不会携带
pub const LOCAL_ID_PREFIX: &str = "local_";

/// 生成离线临时 ID：前缀 + 毫秒时间戳 + 随机后缀
///
/// 同一文档重复提交会复用已有 ID，靠 upsert 幂等去重；
/// 随机后缀只用于避免同一毫秒内的两次新建相互碰撞。
pub fn new_local_id() -> String {
    format!(
        "{}{}_{}",
        LOCAL_ID_PREFIX,
        Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple()
    )
}

/// 判断 ID 是否为离线临时 ID（push 时决定走 create 还是 update）
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

/// 集合类型（受控枚举，新增集合需与服务端路由同步升级）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Patient,
    Doctor,
    Appointment,
    Hospital,
    Bill,
    MedicalRecord,
}

/// 全部集合（同步引擎、挂起统计按此遍历）
pub const ALL_COLLECTIONS: &[Collection] = &[
    Collection::Patient,
    Collection::Doctor,
    Collection::Appointment,
    Collection::Hospital,
    Collection::Bill,
    Collection::MedicalRecord,
];

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Doctor => "doctor",
            Self::Appointment => "appointment",
            Self::Hospital => "hospital",
            Self::Bill => "bill",
            Self::MedicalRecord => "medical_record",
        }
    }

    /// REST 路由段：`/api/{route}`
    pub fn api_route(self) -> &'static str {
        match self {
            Self::Patient => "patients",
            Self::Doctor => "doctors",
            Self::Appointment => "appointments",
            Self::Hospital => "hospitals",
            Self::Bill => "bills",
            Self::MedicalRecord => "medical-records",
        }
    }

    /// 本地 SQLite 表名
    pub fn table_name(self) -> &'static str {
        match self {
            Self::Patient => "patients",
            Self::Doctor => "doctors",
            Self::Appointment => "appointments",
            Self::Hospital => "hospitals",
            Self::Bill => "bills",
            Self::MedicalRecord => "medical_records",
        }
    }
}

impl FromStr for Collection {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "patient" => Ok(Self::Patient),
            "doctor" => Ok(Self::Doctor),
            "appointment" => Ok(Self::Appointment),
            "hospital" => Ok(Self::Hospital),
            "bill" => Ok(Self::Bill),
            "medical_record" => Ok(Self::MedicalRecord),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 同步状态 - 复制引擎据此决定哪些文档还需要到达服务端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// 服务端已确认
    Synced,
    /// 尚未被服务端确认（离线新建或离线编辑）
    Pending,
    /// 上次 push 失败，等待重试或人工处理
    Failed,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "synced" => Ok(Self::Synced),
            "pending" => Ok(Self::Pending),
            "failed" => Ok(Self::Failed),
            other => Err(MedisyncSDKError::InvalidArgument(format!(
                "unknown sync status: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 本地元数据 - 只存在于本地库，永远不发往服务端
///
/// 与 `sync_status` 并存是为了兼容旧的按 `meta.pending` 过滤的查询方式；
/// 两者由存储层一起维护，不允许出现 pending 标志与状态不一致。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMeta {
    /// 是否由离线路径写入
    pub offline: bool,
    /// 是否还在排队等待同步
    pub pending: bool,
    /// 本地首次写入时间
    pub created_at: DateTime<Utc>,
    /// 最近一次被服务端确认的时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
    /// 终态失败标记：远端业务拒绝后置位，push 查询跳过此类文档
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub terminal_failure: bool,
}

impl DocumentMeta {
    /// 离线排队写入的元数据
    pub fn queued(now: DateTime<Utc>) -> Self {
        Self {
            offline: true,
            pending: true,
            created_at: now,
            synced_at: None,
            terminal_failure: false,
        }
    }

    /// 服务端确认后的元数据
    pub fn synced(now: DateTime<Utc>) -> Self {
        Self {
            offline: false,
            pending: false,
            created_at: now,
            synced_at: Some(now),
            terminal_failure: false,
        }
    }
}

/// 预约状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    CheckedIn,
    Completed,
    Cancelled,
}

/// 预约优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentPriority {
    Normal,
    Urgent,
    Emergency,
}

/// 账单状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    Unpaid,
    PartiallyPaid,
    Paid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRecord {
    pub name: String,
    pub email: String,
    pub hospital_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blood_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorRecord {
    pub name: String,
    pub email: String,
    pub specialization: String,
    pub hospital_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentRecord {
    pub patient_id: String,
    pub doctor_id: String,
    pub hospital_id: String,
    /// 预约日期（ISO 日期字符串，排序/展示用，服务端同格式）
    pub appointment_date: String,
    pub status: AppointmentStatus,
    pub priority: AppointmentPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_slot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HospitalRecord {
    pub name: String,
    pub address: String,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillRecord {
    pub patient_id: String,
    pub hospital_id: String,
    pub amount: f64,
    pub status: BillStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appointment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_on: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalRecordEntry {
    pub patient_id: String,
    pub doctor_id: String,
    pub hospital_id: String,
    pub diagnosis: String,
    pub visit_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prescription: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// 强类型文档负载 - 每个集合一个变体
///
/// 标签写入 `collection` 字段，与 [`Collection::as_str`] 一致；
/// 动态 JSON 在写网关边界就被解析成这里的变体，之后全程强类型。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "collection", rename_all = "snake_case")]
pub enum DocumentPayload {
    Patient(PatientRecord),
    Doctor(DoctorRecord),
    Appointment(AppointmentRecord),
    Hospital(HospitalRecord),
    Bill(BillRecord),
    MedicalRecord(MedicalRecordEntry),
}

impl DocumentPayload {
    /// 负载所属集合
    pub fn collection(&self) -> Collection {
        match self {
            Self::Patient(_) => Collection::Patient,
            Self::Doctor(_) => Collection::Doctor,
            Self::Appointment(_) => Collection::Appointment,
            Self::Hospital(_) => Collection::Hospital,
            Self::Bill(_) => Collection::Bill,
            Self::MedicalRecord(_) => Collection::MedicalRecord,
        }
    }

    /// 集合 schema 校验：必填字段非空、数值合法
    ///
    /// 校验失败返回 [`MedisyncSDKError::SchemaViolation`]，文档不会落库。
    pub fn validate(&self) -> Result<()> {
        fn require(collection: Collection, field: &str, value: &str) -> Result<()> {
            if value.trim().is_empty() {
                return Err(MedisyncSDKError::SchemaViolation(format!(
                    "{}: required field `{}` is empty",
                    collection, field
                )));
            }
            Ok(())
        }

        match self {
            Self::Patient(r) => {
                require(Collection::Patient, "name", &r.name)?;
                require(Collection::Patient, "email", &r.email)?;
                require(Collection::Patient, "hospitalId", &r.hospital_id)?;
            }
            Self::Doctor(r) => {
                require(Collection::Doctor, "name", &r.name)?;
                require(Collection::Doctor, "email", &r.email)?;
                require(Collection::Doctor, "specialization", &r.specialization)?;
                require(Collection::Doctor, "hospitalId", &r.hospital_id)?;
            }
            Self::Appointment(r) => {
                require(Collection::Appointment, "patientId", &r.patient_id)?;
                require(Collection::Appointment, "doctorId", &r.doctor_id)?;
                require(Collection::Appointment, "hospitalId", &r.hospital_id)?;
                require(Collection::Appointment, "appointmentDate", &r.appointment_date)?;
            }
            Self::Hospital(r) => {
                require(Collection::Hospital, "name", &r.name)?;
                require(Collection::Hospital, "address", &r.address)?;
                require(Collection::Hospital, "city", &r.city)?;
            }
            Self::Bill(r) => {
                require(Collection::Bill, "patientId", &r.patient_id)?;
                require(Collection::Bill, "hospitalId", &r.hospital_id)?;
                if !r.amount.is_finite() || r.amount < 0.0 {
                    return Err(MedisyncSDKError::SchemaViolation(format!(
                        "bill: amount must be a non-negative number, got {}",
                        r.amount
                    )));
                }
            }
            Self::MedicalRecord(r) => {
                require(Collection::MedicalRecord, "patientId", &r.patient_id)?;
                require(Collection::MedicalRecord, "doctorId", &r.doctor_id)?;
                require(Collection::MedicalRecord, "hospitalId", &r.hospital_id)?;
                require(Collection::MedicalRecord, "diagnosis", &r.diagnosis)?;
                require(Collection::MedicalRecord, "visitDate", &r.visit_date)?;
            }
        }
        Ok(())
    }

    /// 外键：患者 ID（本地索引列用）
    pub fn patient_id(&self) -> Option<&str> {
        match self {
            Self::Appointment(r) => Some(&r.patient_id),
            Self::Bill(r) => Some(&r.patient_id),
            Self::MedicalRecord(r) => Some(&r.patient_id),
            _ => None,
        }
    }

    /// 外键：医生 ID
    pub fn doctor_id(&self) -> Option<&str> {
        match self {
            Self::Appointment(r) => Some(&r.doctor_id),
            Self::MedicalRecord(r) => Some(&r.doctor_id),
            _ => None,
        }
    }

    /// 外键：医院 ID
    pub fn hospital_id(&self) -> Option<&str> {
        match self {
            Self::Patient(r) => Some(&r.hospital_id),
            Self::Doctor(r) => Some(&r.hospital_id),
            Self::Appointment(r) => Some(&r.hospital_id),
            Self::Bill(r) => Some(&r.hospital_id),
            Self::MedicalRecord(r) => Some(&r.hospital_id),
            Self::Hospital(_) => None,
        }
    }
}

/// 文档信封 - 本地库中一行，同一逻辑实体任意时刻只存在一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub payload: DocumentPayload,
    pub created_at: DateTime<Utc>,
    /// 排序与冲突解决的唯一权威时间戳
    pub updated_at: DateTime<Utc>,
    pub sync_status: SyncStatus,
    pub meta: DocumentMeta,
}

impl Document {
    /// 离线路径新建文档（无 existing_id 时自动分配临时 ID）
    pub fn new_queued(id: Option<String>, payload: DocumentPayload, now: DateTime<Utc>) -> Self {
        Self {
            id: id.unwrap_or_else(new_local_id),
            payload,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Pending,
            meta: DocumentMeta::queued(now),
        }
    }

    pub fn collection(&self) -> Collection {
        self.payload.collection()
    }

    /// 是否仍在等待到达服务端
    pub fn is_pending(&self) -> bool {
        self.sync_status != SyncStatus::Synced
    }

    /// 是否为离线新建（临时 ID + 未同步）
    pub fn is_unsynced_create(&self) -> bool {
        is_local_id(&self.id) && self.is_pending()
    }

    /// 生成发往服务端的请求体：领域字段 + 时间戳，剥掉 id / syncStatus / meta
    pub fn to_wire_body(&self) -> Result<serde_json::Value> {
        let mut value = serde_json::to_value(&self.payload)?;
        let obj = value.as_object_mut().ok_or_else(|| {
            MedisyncSDKError::Serialization("payload did not serialize to an object".into())
        })?;
        obj.remove("collection");
        obj.insert("createdAt".into(), serde_json::json!(self.created_at));
        obj.insert("updatedAt".into(), serde_json::json!(self.updated_at));
        Ok(value)
    }
}

/// 服务端返回的文档（wire 形态：信封字段 + 平铺的领域字段）
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireDocument {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// 领域字段原样保留，按集合解析成强类型负载
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl WireDocument {
    /// 解析为本地文档，标记为已同步
    ///
    /// 服务端字段里偶尔会回显 clientRef / syncStatus 等信封字段，解析前剥除。
    pub fn into_document(self, collection: Collection, now: DateTime<Utc>) -> Result<Document> {
        let mut fields = self.fields;
        for envelope_key in ["clientRef", "syncStatus", "meta", "_id"] {
            fields.remove(envelope_key);
        }
        fields.insert(
            "collection".into(),
            serde_json::Value::String(collection.as_str().to_string()),
        );
        let payload: DocumentPayload = serde_json::from_value(serde_json::Value::Object(fields))
            .map_err(|e| {
                MedisyncSDKError::Serialization(format!(
                    "server document for `{}` does not match schema: {}",
                    collection, e
                ))
            })?;
        if payload.collection() != collection {
            return Err(MedisyncSDKError::SchemaViolation(format!(
                "server document tagged `{}` arrived on `{}` sync",
                payload.collection(),
                collection
            )));
        }
        Ok(Document {
            id: self.id,
            payload,
            created_at: self.created_at,
            updated_at: self.updated_at,
            sync_status: SyncStatus::Synced,
            meta: DocumentMeta::synced(now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appointment_payload() -> DocumentPayload {
        DocumentPayload::Appointment(AppointmentRecord {
            patient_id: "p1".into(),
            doctor_id: "d1".into(),
            hospital_id: "h1".into(),
            appointment_date: "2025-03-01".into(),
            status: AppointmentStatus::Scheduled,
            priority: AppointmentPriority::Normal,
            time_slot: None,
            reason: None,
        })
    }

    #[test]
    fn local_id_convention() {
        let id = new_local_id();
        assert!(is_local_id(&id));
        assert!(!is_local_id("srv_123"));
        // 同一毫秒生成的两个 ID 也不能相同
        assert_ne!(new_local_id(), new_local_id());
    }

    #[test]
    fn payload_validation_rejects_missing_fields() {
        let payload = DocumentPayload::Appointment(AppointmentRecord {
            patient_id: "".into(),
            doctor_id: "d1".into(),
            hospital_id: "h1".into(),
            appointment_date: "2025-03-01".into(),
            status: AppointmentStatus::Scheduled,
            priority: AppointmentPriority::Normal,
            time_slot: None,
            reason: None,
        });
        let err = payload.validate().unwrap_err();
        assert!(matches!(err, MedisyncSDKError::SchemaViolation(_)));
    }

    #[test]
    fn payload_validation_rejects_negative_amount() {
        let payload = DocumentPayload::Bill(BillRecord {
            patient_id: "p1".into(),
            hospital_id: "h1".into(),
            amount: -10.0,
            status: BillStatus::Unpaid,
            appointment_id: None,
            issued_on: None,
        });
        assert!(payload.validate().is_err());
    }

    #[test]
    fn wire_body_strips_bookkeeping() {
        let doc = Document::new_queued(None, appointment_payload(), Utc::now());
        let body = doc.to_wire_body().unwrap();
        let obj = body.as_object().unwrap();
        assert!(obj.get("id").is_none());
        assert!(obj.get("collection").is_none());
        assert!(obj.get("syncStatus").is_none());
        assert!(obj.get("meta").is_none());
        assert_eq!(obj["patientId"], "p1");
        assert!(obj.get("updatedAt").is_some());
    }

    #[test]
    fn wire_document_roundtrip() {
        let raw = serde_json::json!({
            "id": "srv_42",
            "createdAt": "2025-03-01T08:00:00Z",
            "updatedAt": "2025-03-01T09:00:00Z",
            "patientId": "p1",
            "doctorId": "d1",
            "hospitalId": "h1",
            "appointmentDate": "2025-03-05",
            "status": "scheduled",
            "priority": "urgent",
            "clientRef": "local_123_abc"
        });
        let wire: WireDocument = serde_json::from_value(raw).unwrap();
        let doc = wire
            .into_document(Collection::Appointment, Utc::now())
            .unwrap();
        assert_eq!(doc.id, "srv_42");
        assert_eq!(doc.sync_status, SyncStatus::Synced);
        match &doc.payload {
            DocumentPayload::Appointment(r) => {
                assert_eq!(r.priority, AppointmentPriority::Urgent);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn wire_document_wrong_collection_is_rejected() {
        let raw = serde_json::json!({
            "id": "srv_1",
            "createdAt": "2025-03-01T08:00:00Z",
            "updatedAt": "2025-03-01T08:00:00Z",
            "name": "General Hospital",
            "address": "1 Main St",
            "city": "Metropolis"
        });
        let wire: WireDocument = serde_json::from_value(raw).unwrap();
        // hospital 字段喂给 appointment 同步必须报错，而不是落一条残缺文档
        assert!(wire
            .into_document(Collection::Appointment, Utc::now())
            .is_err());
    }
}
