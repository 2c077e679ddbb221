use thiserror::Error;

use super::actions::ActionKind;
use crate::common::client::error::ApiError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("任务负载格式错误: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{action}任务 {id} 失败: {source}")]
    Api {
        action: ActionKind,
        id: i64,
        #[source]
        source: ApiError,
    },

    #[error("添加小说 {novel_id} 失败: {source}")]
    Add {
        novel_id: String,
        #[source]
        source: ApiError,
    },

    #[error("获取任务列表失败: {0}")]
    Fetch(#[source] ApiError),
}

impl ActionError {
    pub fn api_error(&self) -> &ApiError {
        match self {
            ActionError::Api { source, .. } => source,
            ActionError::Add { source, .. } => source,
            ActionError::Fetch(source) => source,
        }
    }
}
