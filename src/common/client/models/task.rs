use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tasks::models::DownloadTask;

#[derive(Debug, Clone, Deserialize)]
pub struct TaskListResponse {
    pub tasks: Vec<DownloadTask>,
}

/// terminate / redownload 的响应
#[derive(Debug, Clone, Deserialize)]
pub struct TaskActionResponse {
    #[serde(alias = "msg")]
    pub message: String,
    pub task: DownloadTask,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddNovelRequest<'a> {
    pub novel_id: &'a str,
}

/// 后台作业的细粒度状态，与 DownloadTask.status 不同
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct JobStatus {
    pub task_id: String,
    pub status: String,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub meta: Option<Value>,
    #[serde(default)]
    pub traceback: Option<String>,
}
