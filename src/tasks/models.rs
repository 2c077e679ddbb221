use std::fmt;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::error::RepositoryError;

// --------------------------------------------------------------------
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Downloading,
    Processing,
    Completed,
    Failed,
    Terminated,
}

impl TaskStatus {
    /// 后端仍在处理中的状态
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TaskStatus::Pending | TaskStatus::Downloading | TaskStatus::Processing
        )
    }

    /// 已经结束（成功、失败或被终止）
    pub fn is_finished(self) -> bool {
        !self.is_active()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Downloading => "DOWNLOADING",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --------------------------------------------------------------------
/// 任务内嵌的小说快照
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NovelSnapshot {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
}

/// 后台下载任务。`deleted` 只在本地使用，不参与序列化。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadTask {
    pub id: i64,
    pub user_id: i64,
    #[serde(deserialize_with = "string_or_number")]
    pub novel_id: String,
    #[serde(default)]
    pub novel: Option<NovelSnapshot>,
    // 后端字段名为 celery_task_id
    #[serde(default, rename = "celery_task_id", alias = "worker_job_id")]
    pub worker_job_id: Option<String>,
    pub status: TaskStatus,
    #[serde(default, deserialize_with = "progress_fraction")]
    pub progress: f64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub created_at: Option<NaiveDateTime>,
    #[serde(deserialize_with = "timestamp")]
    pub updated_at: NaiveDateTime,
    #[serde(skip)]
    pub deleted: bool,
}

impl DownloadTask {
    /// 用于展示的进度：完成显示满格，其余保留最后一次观测值
    pub fn display_progress(&self) -> f64 {
        match self.status {
            TaskStatus::Completed => 1.0,
            TaskStatus::Pending => 0.0,
            _ => self.progress,
        }
    }

    pub fn title(&self) -> &str {
        self.novel
            .as_ref()
            .map(|n| n.title.as_str())
            .unwrap_or(self.novel_id.as_str())
    }
}

// --------------------------------------------------------------------
/// 推送通道上的一条任务更新
#[derive(Debug, Clone, PartialEq)]
pub enum TaskUpdate {
    Snapshot(DownloadTask),
    // 服务端删除任务后推送 {id, deleted: true}
    Deleted { id: i64 },
}

impl TaskUpdate {
    pub fn id(&self) -> i64 {
        match self {
            TaskUpdate::Snapshot(task) => task.id,
            TaskUpdate::Deleted { id } => *id,
        }
    }

    /// 解析推送负载。缺少 id 或 updated_at 的记录视为格式错误。
    pub fn from_value(value: Value) -> Result<Self, RepositoryError> {
        let Some(object) = value.as_object() else {
            return Err(RepositoryError::Malformed("负载不是 JSON 对象".to_string()));
        };

        let id = object
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| RepositoryError::Malformed("缺少任务 id".to_string()))?;

        if object.get("deleted").and_then(Value::as_bool) == Some(true) {
            return Ok(TaskUpdate::Deleted { id });
        }

        match object.get("updated_at") {
            None | Some(Value::Null) => {
                return Err(RepositoryError::Malformed(format!(
                    "任务 {} 缺少 updated_at",
                    id
                )));
            }
            Some(_) => {}
        }

        serde_json::from_value::<DownloadTask>(value)
            .map(TaskUpdate::Snapshot)
            .map_err(|e| RepositoryError::Malformed(format!("任务 {}: {}", id, e)))
    }
}

// --------------------------------------------------------------------
// 反序列化辅助

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "期望字符串或数字，实际为 {}",
            other
        ))),
    }
}

/// 整数按百分比处理（后端存储 0-100），浮点数按比例处理，结果限制在 [0, 1]
fn progress_fraction<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let fraction = match Value::deserialize(deserializer)? {
        Value::Null => 0.0,
        Value::Number(n) if n.is_f64() => n.as_f64().unwrap_or(0.0),
        Value::Number(n) => n.as_f64().unwrap_or(0.0) / 100.0,
        other => {
            return Err(serde::de::Error::custom(format!(
                "无效的进度值: {}",
                other
            )));
        }
    };
    Ok(fraction.clamp(0.0, 1.0))
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

fn timestamp<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("无效的时间戳: {}", raw)))
}

fn optional_timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("无效的时间戳: {}", raw))),
    }
}
