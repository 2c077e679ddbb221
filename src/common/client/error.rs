use thiserror::Error;

use crate::tasks::models::DownloadTask;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("网络请求失败: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("无效的地址: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("响应解析失败: {0}")]
    InvalidResponse(String),

    #[error("需要登录认证")]
    AuthRequired,

    #[error("认证失败: {0}")]
    Unauthorized(String),

    #[error("任务冲突: {message}")]
    Conflict {
        message: String,
        // 服务端会附带当前仍在进行的任务
        task: Option<Box<DownloadTask>>,
    },

    #[error("请求被拒绝 ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("服务端错误 ({status}): {message}")]
    Server { status: u16, message: String },
}

impl ApiError {
    /// 认证类错误，需要上层处理登出
    pub fn is_auth_error(&self) -> bool {
        matches!(self, ApiError::AuthRequired | ApiError::Unauthorized(_))
    }

    /// 服务端返回的原始错误信息
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ApiError::Unauthorized(message)
            | ApiError::Conflict { message, .. }
            | ApiError::Rejected { message, .. }
            | ApiError::Server { message, .. } => Some(message.as_str()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidResponse(e.to_string())
    }
}
