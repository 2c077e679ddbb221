use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChannelError {
    #[error("缺少认证令牌")]
    MissingToken,

    #[error("连接失败: {0}")]
    Transport(String),

    #[error("认证被拒绝: {0}")]
    AuthRejected(String),

    #[error("握手超时")]
    HandshakeTimeout,

    #[error("连接在握手期间关闭")]
    ClosedDuringHandshake,
}

impl ChannelError {
    /// 认证类错误重试也不会成功
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ChannelError::MissingToken | ChannelError::AuthRejected(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChannelError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ChannelError::Transport(e.to_string())
    }
}
