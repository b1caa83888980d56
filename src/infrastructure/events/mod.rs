//! Events - 进度事件发布

mod publisher;

pub use publisher::ProgressPublisher;
