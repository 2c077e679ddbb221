use thiserror::Error;

use crate::common::client::error::ApiError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("接口请求失败: {0}")]
    Api(#[from] ApiError),

    #[error("用户名或密码错误: {0}")]
    InvalidCredentials(String),

    #[error("IO操作失败: {0}")]
    IoError(#[from] std::io::Error),

    #[error("令牌文件格式错误: {0}")]
    Format(#[from] serde_json::Error),

    #[error("尚未登录")]
    NotLoggedIn,
}

pub type Result<T> = std::result::Result<T, AuthError>;
