//! 事件系统模块 - 同步核心对 UI 层的信号面
//!
//! 功能包括：
//! - 写路径信号：「已保存到线上」「已离线保存，待同步」
//! - 同步生命周期信号：开始 / 完成（含条数）/ 失败
//! - 挂起角标计数变化
//! - 网络状态跳变转发
//!
//! UI 怎么呈现不归这里管；核心只负责把事实广播出去。

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::network::NetworkStatus;
use crate::storage::documents::Collection;

/// 同步核心对外广播的事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// 在线写成功，服务端已确认
    WriteCommitted { collection: Collection, id: String },
    /// 离线保存成功，等待重连后同步
    SavedOffline { collection: Collection, id: String },
    /// 一轮同步开始
    SyncStarted,
    /// 一轮同步完成；`pushed` 为本轮排掉的离线修改条数
    SyncCompleted { pushed: usize, pulled: usize },
    /// 一轮同步失败（等待退避重试）
    SyncFailed { collection: Collection, error: String },
    /// 挂起角标数值变化
    PendingCountChanged { count: u64 },
    /// 网络状态跳变（UI 据此切换「展示缓存数据」横幅）
    NetworkChanged { online: bool },
}

/// 事件总线 - broadcast 扇出，无订阅者时事件直接丢弃
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// 广播事件；没有订阅者不算错误
    pub fn emit(&self, event: SyncEvent) {
        debug!("事件: {:?}", event);
        let _ = self.sender.send(event);
    }

    pub fn emit_network(&self, status: NetworkStatus) {
        self.emit(SyncEvent::NetworkChanged {
            online: status.is_online(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
