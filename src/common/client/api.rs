use async_trait::async_trait;

use super::error::ApiError;
use super::models::common::MessageResponse;
use super::models::task::{JobStatus, TaskActionResponse};
use crate::tasks::models::DownloadTask;

/// 任务相关的 REST 接口。编排器只依赖这个 trait，测试里可以替换实现。
#[async_trait]
pub trait TaskApi: Send + Sync {
    async fn list_tasks(&self) -> Result<Vec<DownloadTask>, ApiError>;

    async fn terminate(&self, id: i64) -> Result<TaskActionResponse, ApiError>;

    async fn delete(&self, id: i64) -> Result<MessageResponse, ApiError>;

    async fn redownload(&self, id: i64) -> Result<TaskActionResponse, ApiError>;

    // 创建新任务，成功时返回 202 与任务记录
    async fn add_novel(&self, novel_id: &str) -> Result<DownloadTask, ApiError>;

    async fn job_status(&self, job_id: &str) -> Result<JobStatus, ApiError>;
}
