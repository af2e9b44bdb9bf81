//! 同步调度器 - 何时同步、失败如何退避
//!
//! 职责边界（与 ReplicationEngine 分离）：
//! - Engine：给定集合，机械执行一轮 pull → push，不含任何策略
//! - 本模块：监听网络跳变，离线→在线后等一段 settle 延迟再触发
//!   （避免追着抖动的连接跑），失败按指数退避重试
//!
//! 手动触发走 SDK 直接调 `engine.sync_all()`，集合锁保证与自动触发并发安全。

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::network::NetworkMonitor;
use crate::sync::engine::ReplicationEngine;
use crate::sync::retry_policy::RetryPolicy;

/// 同步调度器
#[derive(Debug)]
pub struct SyncScheduler {
    engine: Arc<ReplicationEngine>,
    network: Arc<NetworkMonitor>,
    policy: RetryPolicy,
    settle_delay: Duration,
}

impl SyncScheduler {
    pub fn new(
        engine: Arc<ReplicationEngine>,
        network: Arc<NetworkMonitor>,
        policy: RetryPolicy,
        settle_delay: Duration,
    ) -> Self {
        Self {
            engine,
            network,
            policy,
            settle_delay,
        }
    }

    /// 启动后台调度循环；`shutdown_rx` 翻转为 true 时退出
    pub fn spawn(self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut network_rx = self.network.subscribe();
            info!("🔄 同步调度器启动 (settle_delay={:?})", self.settle_delay);

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    event = network_rx.recv() => {
                        match event {
                            Ok(event) if event.is_reconnect() => {
                                // settle 延迟：抖动的连接先让它抖完
                                tokio::time::sleep(self.settle_delay).await;
                                if !self.network.is_online().await {
                                    debug!("settle 期间又掉线，跳过本次触发");
                                    continue;
                                }
                                info!("📡 网络恢复，开始排水同步");
                                self.run_with_backoff(&mut shutdown_rx).await;
                            }
                            Ok(_) => {}
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                                debug!("网络事件滞后，跳过 {} 条", skipped);
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
            info!("同步调度器退出");
        })
    }

    /// 执行同步并按策略退避重试，直到干净、不可重试或掉线
    async fn run_with_backoff(&self, shutdown_rx: &mut watch::Receiver<bool>) {
        let mut attempt: u32 = 0;
        loop {
            if *shutdown_rx.borrow() || !self.network.is_online().await {
                return;
            }

            let report = self.engine.sync_all().await;
            if report.is_clean() {
                return;
            }
            if !report.has_retryable_failure() {
                // 只剩终态失败（业务拒绝），重试也不会变好
                warn!("同步余留 {} 个不可重试失败，等待人工处理", report.failures.len());
                return;
            }

            let Some(reason) = report
                .failures
                .iter()
                .find(|f| f.reason.is_retryable())
                .map(|f| f.reason)
            else {
                return;
            };
            match self.policy.next_delay(attempt, reason) {
                Some(delay) => {
                    warn!(
                        "同步失败（attempt {}），{:?} 后重试",
                        attempt + 1,
                        delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_rx.changed() => return,
                    }
                    attempt += 1;
                }
                None => {
                    warn!("同步重试次数用尽，等待下一次触发");
                    return;
                }
            }
        }
    }
}
