//! Progress Publisher Implementation
//!
//! WebSocket 进度推送实现。实现 ProgressSinkPort：
//! 每个任务一条 broadcast 通道（任务详情页订阅），外加一条全局通道。
//! 进度是建议性的，投递失败只记 debug 日志。

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::application::ports::{ProgressEvent, ProgressSinkPort};

/// 进度发布器
pub struct ProgressPublisher {
    /// job_id -> broadcast sender（任务级订阅）
    job_channels: DashMap<Uuid, broadcast::Sender<ProgressEvent>>,
    /// 全局通道（所有任务的进度事件）
    global_channel: broadcast::Sender<ProgressEvent>,
}

impl ProgressPublisher {
    pub fn new() -> Self {
        let (global_tx, _) = broadcast::channel(256);
        Self {
            job_channels: DashMap::new(),
            global_channel: global_tx,
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 订阅全局进度事件
    pub fn subscribe_global(&self) -> broadcast::Receiver<ProgressEvent> {
        self.global_channel.subscribe()
    }

    /// 注册任务的进度通道
    pub fn register_job(&self, job_id: Uuid) -> broadcast::Receiver<ProgressEvent> {
        if let Some(sender) = self.job_channels.get(&job_id) {
            return sender.subscribe();
        }

        let (tx, rx) = broadcast::channel(256);
        self.job_channels.insert(job_id, tx);
        rx
    }

    /// 取消注册任务通道
    pub fn unregister_job(&self, job_id: Uuid) {
        self.job_channels.remove(&job_id);
    }

    /// 获取任务的进度接收器
    pub fn subscribe(&self, job_id: Uuid) -> Option<broadcast::Receiver<ProgressEvent>> {
        self.job_channels.get(&job_id).map(|s| s.subscribe())
    }
}

impl Default for ProgressPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSinkPort for ProgressPublisher {
    fn publish(&self, event: ProgressEvent) {
        if let Some(sender) = self.job_channels.get(&event.job_id) {
            if let Err(e) = sender.send(event.clone()) {
                tracing::debug!(
                    job_id = %event.job_id,
                    error = %e,
                    "Failed to publish job progress (no receivers)"
                );
            }
        }

        if let Err(e) = self.global_channel.send(event.clone()) {
            tracing::debug!(
                job_id = %event.job_id,
                error = %e,
                "Failed to publish global progress (no receivers)"
            );
        }
    }
}
