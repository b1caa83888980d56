//! Progress Sink Port - 进度上报
//!
//! 进度事件是建议性的：至少一次投递即可，消费者必须容忍重复和乱序。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 归一化进度事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    /// 阶段名（与 JobStatus 口径一致）
    pub phase: String,
    /// 0-100
    pub percent: u8,
    /// 人类可读描述
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(job_id: Uuid, phase: impl Into<String>, percent: u8, message: impl Into<String>) -> Self {
        Self {
            job_id,
            phase: phase.into(),
            percent: percent.min(100),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Progress Sink Port
///
/// 外部推送通道的抽象接口（如 WebSocket）
pub trait ProgressSinkPort: Send + Sync {
    /// 推送进度事件（失败只记日志，不影响任务执行）
    fn publish(&self, event: ProgressEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_clamped() {
        let event = ProgressEvent::new(Uuid::new_v4(), "generating", 150, "chunk 2/3");
        assert_eq!(event.percent, 100);
    }
}
