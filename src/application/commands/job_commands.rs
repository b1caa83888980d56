//! Job Commands - 任务命令定义

use uuid::Uuid;

use crate::application::ports::ArchitectureFeedback;
use crate::domain::book::BookParams;

/// 提交书籍生成任务
#[derive(Debug, Clone)]
pub struct SubmitBookCommand {
    pub user_id: String,
    pub params: BookParams,
}

/// 确认大纲，进入全书生成
#[derive(Debug, Clone)]
pub struct ApproveArchitectureCommand {
    pub job_id: Uuid,
}

/// 携带反馈重生成大纲
#[derive(Debug, Clone)]
pub struct RegenerateArchitectureCommand {
    pub job_id: Uuid,
    pub feedback: ArchitectureFeedback,
}

/// 取消任务
#[derive(Debug, Clone)]
pub struct CancelJobCommand {
    pub job_id: Uuid,
}
