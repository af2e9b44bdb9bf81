//! 网络状态监控 - 「现在在线吗」的唯一事实来源
//!
//! 只信平台连通性信号，不做探测或启发式判断；误报按已知局限接受。
//! 状态变化通过 broadcast 扇出，复制调度器据此触发排水。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::Result;

/// 网络状态（布尔信号）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkStatus {
    Online,
    Offline,
}

impl NetworkStatus {
    pub fn is_online(self) -> bool {
        self == NetworkStatus::Online
    }
}

/// 网络状态变化事件
#[derive(Debug, Clone)]
pub struct NetworkStatusEvent {
    pub old_status: NetworkStatus,
    pub new_status: NetworkStatus,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl NetworkStatusEvent {
    /// 是否为离线→在线跳变（触发同步排水的唯一信号）
    pub fn is_reconnect(&self) -> bool {
        self.old_status == NetworkStatus::Offline && self.new_status == NetworkStatus::Online
    }
}

/// 平台连通性信号源（由宿主实现：浏览器 online/offline、移动端可达性回调等）
#[async_trait]
pub trait NetworkStatusListener: Send + Sync + std::fmt::Debug {
    /// 启动时的初始状态
    async fn current_status(&self) -> NetworkStatus;

    /// 开始监听平台信号，返回事件接收端
    async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatus>>;
}

/// 网络监控管理器
#[derive(Debug)]
pub struct NetworkMonitor {
    listener: Arc<dyn NetworkStatusListener>,
    event_sender: broadcast::Sender<NetworkStatusEvent>,
    current_status: Arc<tokio::sync::RwLock<NetworkStatus>>,
}

impl NetworkMonitor {
    pub fn new(listener: Arc<dyn NetworkStatusListener>) -> Self {
        let (event_sender, _) = broadcast::channel(64);
        Self {
            listener,
            event_sender,
            current_status: Arc::new(tokio::sync::RwLock::new(NetworkStatus::Offline)),
        }
    }

    /// 启动监控：读取平台初始状态并开始转发跳变事件
    pub async fn start(&self) -> Result<()> {
        let initial = self.listener.current_status().await;
        {
            let mut status = self.current_status.write().await;
            *status = initial;
        }
        tracing::info!("📡 网络监控启动，初始状态: {:?}", initial);

        let mut receiver = self.listener.start_monitoring().await?;
        let event_sender = self.event_sender.clone();
        let current_status = self.current_status.clone();

        tokio::spawn(async move {
            while let Ok(new_status) = receiver.recv().await {
                let old_status = {
                    let mut status = current_status.write().await;
                    let old = *status;
                    *status = new_status;
                    old
                };
                if old_status != new_status {
                    let _ = event_sender.send(NetworkStatusEvent {
                        old_status,
                        new_status,
                        timestamp: chrono::Utc::now(),
                    });
                }
            }
        });

        Ok(())
    }

    /// 当前是否在线
    pub async fn is_online(&self) -> bool {
        self.current_status.read().await.is_online()
    }

    pub async fn status(&self) -> NetworkStatus {
        *self.current_status.read().await
    }

    /// 手动设置状态（请求层观察到确定性结果时回填）
    pub async fn set_status(&self, new_status: NetworkStatus) {
        let old_status = {
            let mut status = self.current_status.write().await;
            let old = *status;
            *status = new_status;
            old
        };
        if old_status != new_status {
            let _ = self.event_sender.send(NetworkStatusEvent {
                old_status,
                new_status,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    /// 订阅状态跳变
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkStatusEvent> {
        self.event_sender.subscribe()
    }
}

#[cfg(test)]
pub mod test_helpers {
    use super::*;

    /// 测试用：可手动拨动的网络信号源
    #[derive(Debug)]
    pub struct ScriptedNetworkListener {
        initial: NetworkStatus,
        sender: broadcast::Sender<NetworkStatus>,
    }

    impl ScriptedNetworkListener {
        pub fn new(initial: NetworkStatus) -> Self {
            let (sender, _) = broadcast::channel(16);
            Self { initial, sender }
        }

        /// 拨动平台信号
        pub fn flip(&self, status: NetworkStatus) {
            let _ = self.sender.send(status);
        }
    }

    #[async_trait::async_trait]
    impl NetworkStatusListener for ScriptedNetworkListener {
        async fn current_status(&self) -> NetworkStatus {
            self.initial
        }

        async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatus>> {
            Ok(self.sender.subscribe())
        }
    }
}
