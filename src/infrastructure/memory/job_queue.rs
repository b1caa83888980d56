//! In-Memory Job Queue - 优先级分区队列实现
//!
//! 三条通道（high / normal / low），出队时先高后低，同通道 FIFO。
//! 延迟入队用于限流/熔断时的重排。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::application::ports::{JobPriority, JobQueuePort, QueuedWork};

struct QueueInner {
    lanes: Mutex<[VecDeque<QueuedWork>; 3]>,
    notify: Notify,
    closed: AtomicBool,
}

impl QueueInner {
    fn enqueue(&self, work: QueuedWork, priority: JobPriority) {
        {
            let mut lanes = self.lanes.lock().unwrap();
            lanes[priority.lane()].push_back(work);
        }
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<QueuedWork> {
        let mut lanes = self.lanes.lock().unwrap();
        for lane in lanes.iter_mut() {
            if let Some(work) = lane.pop_front() {
                return Some(work);
            }
        }
        None
    }
}

/// 内存任务队列
#[derive(Clone)]
pub struct InMemoryJobQueue {
    inner: Arc<QueueInner>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                lanes: Mutex::new([VecDeque::new(), VecDeque::new(), VecDeque::new()]),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 关闭队列：清空后 pop 返回 None，worker 随之退出
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueuePort for InMemoryJobQueue {
    async fn push(&self, work: QueuedWork, priority: JobPriority) {
        self.inner.enqueue(work, priority);
    }

    async fn push_delayed(&self, work: QueuedWork, priority: JobPriority, delay: Duration) {
        tracing::debug!(
            job_id = %work.job_id(),
            kind = work.kind_str(),
            delay_ms = delay.as_millis() as u64,
            "Work re-queued with delay"
        );

        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !inner.closed.load(Ordering::SeqCst) {
                inner.enqueue(work, priority);
            }
        });
    }

    async fn pop(&self) -> Option<QueuedWork> {
        loop {
            // 先注册通知，再检查队列，避免丢失唤醒
            let notified = self.inner.notify.notified();

            if let Some(work) = self.inner.try_pop() {
                return Some(work);
            }
            if self.inner.closed.load(Ordering::SeqCst) {
                return None;
            }

            notified.await;
        }
    }

    fn len(&self) -> usize {
        self.inner.lanes.lock().unwrap().iter().map(|l| l.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn arch_work() -> QueuedWork {
        QueuedWork::Architecture {
            job_id: Uuid::new_v4(),
        }
    }

    fn gen_work() -> QueuedWork {
        QueuedWork::FullGeneration {
            job_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_priority_first() {
        let queue = InMemoryJobQueue::new();
        let normal = gen_work();
        let high = arch_work();

        queue.push(normal.clone(), JobPriority::Normal).await;
        queue.push(high.clone(), JobPriority::High).await;

        // 高优先级后入先出
        assert_eq!(queue.pop().await.unwrap().job_id(), high.job_id());
        assert_eq!(queue.pop().await.unwrap().job_id(), normal.job_id());
    }

    #[tokio::test]
    async fn test_fifo_within_priority() {
        let queue = InMemoryJobQueue::new();
        let first = gen_work();
        let second = gen_work();

        queue.push(first.clone(), JobPriority::Normal).await;
        queue.push(second.clone(), JobPriority::Normal).await;

        assert_eq!(queue.pop().await.unwrap().job_id(), first.job_id());
        assert_eq!(queue.pop().await.unwrap().job_id(), second.job_id());
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = InMemoryJobQueue::new().arc();
        let work = arch_work();
        let expected = work.job_id();

        let popper = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(work, JobPriority::High).await;

        let popped = popper.await.unwrap().unwrap();
        assert_eq!(popped.job_id(), expected);
    }

    #[tokio::test]
    async fn test_delayed_push() {
        let queue = InMemoryJobQueue::new();
        queue
            .push_delayed(arch_work(), JobPriority::High, Duration::from_millis(20))
            .await;

        assert_eq!(queue.len(), 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_close_drains_then_none() {
        let queue = InMemoryJobQueue::new();
        queue.push(arch_work(), JobPriority::High).await;
        queue.close();

        assert!(queue.pop().await.is_some());
        assert!(queue.pop().await.is_none());
    }
}
