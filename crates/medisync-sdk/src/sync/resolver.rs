//! 冲突解决器 - 同一逻辑文档两个版本的确定性归一
//!
//! 规则：按 `updatedAt` 取最后写者，整体替换（不做字段级合并）；
//! 时间戳相等时服务端版本胜出，保证规则确定且重放幂等。
//! 存储侧冲突（pull 要覆盖仍挂起的本地修改）与远端侧冲突
//! （push 因服务端副本更新被拒）走同一条规则。

use tracing::debug;

use crate::storage::documents::Document;

/// 归一结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// 本地版本胜出，保留挂起修改继续等待 push
    LocalWins,
    /// 服务端版本胜出，本地修改整体丢弃
    ServerWins,
}

/// 纯函数：给定本地与服务端版本，判定胜者
///
/// 调用方负责对胜者落库；败者不留任何字段。
pub fn resolve(local: &Document, server: &Document) -> Resolution {
    debug_assert_eq!(local.id, server.id, "conflict resolution needs one logical document");

    let resolution = if local.updated_at > server.updated_at {
        Resolution::LocalWins
    } else {
        // 包含相等的情况：平局偏向服务端，重放时结果不变
        Resolution::ServerWins
    };

    debug!(
        "冲突归一 {}: local@{} vs server@{} -> {:?}",
        local.id, local.updated_at, server.updated_at, resolution
    );
    resolution
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    use crate::storage::documents::{
        AppointmentPriority, AppointmentRecord, AppointmentStatus, Document, DocumentMeta,
        DocumentPayload, SyncStatus,
    };

    fn appointment(id: &str, status: AppointmentStatus, updated_at: &str) -> Document {
        let updated_at: DateTime<Utc> = updated_at.parse().unwrap();
        Document {
            id: id.into(),
            payload: DocumentPayload::Appointment(AppointmentRecord {
                patient_id: "p1".into(),
                doctor_id: "d1".into(),
                hospital_id: "h1".into(),
                appointment_date: "2025-03-05".into(),
                status,
                priority: AppointmentPriority::Normal,
                time_slot: None,
                reason: None,
            }),
            created_at: updated_at,
            updated_at,
            sync_status: SyncStatus::Pending,
            meta: DocumentMeta::queued(updated_at),
        }
    }

    #[test]
    fn newer_server_version_wins() {
        // 场景：离线把 a1 改成 Cancelled@10:00，服务端被别的客户端改成 Completed@10:05
        let local = appointment("a1", AppointmentStatus::Cancelled, "2025-03-01T10:00:00Z");
        let server = appointment("a1", AppointmentStatus::Completed, "2025-03-01T10:05:00Z");
        assert_eq!(resolve(&local, &server), Resolution::ServerWins);
    }

    #[test]
    fn newer_local_version_wins() {
        let local = appointment("a1", AppointmentStatus::Cancelled, "2025-03-01T10:10:00Z");
        let server = appointment("a1", AppointmentStatus::Completed, "2025-03-01T10:05:00Z");
        assert_eq!(resolve(&local, &server), Resolution::LocalWins);
    }

    #[test]
    fn tie_favors_server_and_is_idempotent() {
        let local = appointment("a1", AppointmentStatus::Cancelled, "2025-03-01T10:05:00Z");
        let server = appointment("a1", AppointmentStatus::Completed, "2025-03-01T10:05:00Z");
        assert_eq!(resolve(&local, &server), Resolution::ServerWins);
        // 重放同一对版本，结论不变
        assert_eq!(resolve(&local, &server), Resolution::ServerWins);
    }
}
