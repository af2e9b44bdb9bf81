//! 重试策略 - 失败分类与指数退避
//!
//! 分类学（错误处理设计的核心约束）：
//! - 连通性失败/超时 → 可重试，指数退避
//! - 服务端 5xx → 可重试
//! - 业务拒绝 → 终态，不自动重试（避免对修不好的负载无限循环）
//! - 版本冲突 → 不重试，交给冲突解决器静默处理

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::MedisyncSDKError;

/// 同步失败原因分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncFailureReason {
    /// 网络不可达 - 等待恢复后重试
    NetworkUnavailable,
    /// 网络超时 - 可重试
    NetworkTimeout,
    /// 服务端 5xx - 可重试
    ServerError,
    /// 业务校验拒绝 - 不重试
    DomainRejected,
    /// 版本冲突 - 不重试，走冲突解决
    StaleConflict,
    /// 其他 - 保守起见可重试
    Unknown,
}

impl SyncFailureReason {
    /// 从错误归类
    pub fn classify(err: &MedisyncSDKError) -> Self {
        match err {
            MedisyncSDKError::Connectivity(_) => Self::NetworkUnavailable,
            MedisyncSDKError::Timeout(_) => Self::NetworkTimeout,
            MedisyncSDKError::ServerError(_, _) => Self::ServerError,
            MedisyncSDKError::DomainRejected(_) => Self::DomainRejected,
            MedisyncSDKError::StaleConflict(_) => Self::StaleConflict,
            _ => Self::Unknown,
        }
    }

    /// 判断是否可以重试
    pub fn is_retryable(self) -> bool {
        match self {
            Self::NetworkUnavailable | Self::NetworkTimeout | Self::ServerError => true,
            Self::DomainRejected | Self::StaleConflict => false,
            // 保守策略：未知错误可重试
            Self::Unknown => true,
        }
    }

    /// 是否终态失败（文档标记 failed 后不再被 push 选取）
    pub fn is_terminal(self) -> bool {
        self == Self::DomainRejected
    }
}

/// 重试策略配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 单轮同步的最大重试次数
    pub max_retries: u32,
    /// 基础延迟（毫秒）
    pub base_delay_ms: u64,
    /// 最大延迟（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避因子
    pub backoff_factor: f64,
    /// 随机抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 300_000,
            backoff_factor: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// 计算下次重试延迟；None 表示不应再重试
    pub fn next_delay(&self, retry_count: u32, reason: SyncFailureReason) -> Option<Duration> {
        if retry_count >= self.max_retries || !reason.is_retryable() {
            return None;
        }

        // 基础延迟 = base_delay * (backoff_factor ^ retry_count)
        let base_delay = self.base_delay_ms as f64 * self.backoff_factor.powf(retry_count as f64);
        let capped_delay = base_delay.min(self.max_delay_ms as f64);

        // 随机抖动，避免多个客户端同一时刻齐射
        let jitter = capped_delay * self.jitter_factor * (rand::random::<f64>() - 0.5);
        let final_delay = (capped_delay + jitter).max(0.0);

        Some(Duration::from_millis(final_delay as u64))
    }

    pub fn should_retry(&self, retry_count: u32, reason: SyncFailureReason) -> bool {
        retry_count < self.max_retries && reason.is_retryable()
    }
}
