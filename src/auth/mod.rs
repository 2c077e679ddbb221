mod errors;
pub mod session;
pub mod token;

use std::sync::Arc;

use colored::Colorize;
use tracing::{info, warn};

pub use errors::{AuthError, Result};
pub use session::{SessionState, SessionStore};
pub use token::TokenInfo;

use crate::common::client::client::NovelClient;
use crate::common::client::error::ApiError;
use crate::common::client::models::user_info::UserInfo;

// 认证状态管理核心组件
#[derive(Debug, Clone)]
pub struct AuthManager {
    client: NovelClient,
    session: Arc<SessionStore>,
}

impl AuthManager {
    pub fn new(client: NovelClient) -> Self {
        let session = Arc::clone(client.session());
        Self { client, session }
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    // 用户名密码登录，成功后持久化令牌
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let token = self
            .client
            .login(username, password)
            .await
            .map_err(|e| match e {
                ApiError::Unauthorized(msg) => AuthError::InvalidCredentials(msg),
                other => AuthError::Api(other),
            })?;

        self.session
            .set_token(TokenInfo::new(token, Some(username.to_string())))
            .await?;
        info!("{}: {}", "登录成功".green(), username);
        Ok(())
    }

    // 登出只清理本地状态，服务端令牌自然过期
    pub async fn logout(&self) -> Result<()> {
        self.session.clear().await?;
        info!("{}", "已登出".yellow());
        Ok(())
    }

    /// 恢复上一次的会话，并向服务端确认令牌仍然有效
    pub async fn restore(&self) -> Result<Option<UserInfo>> {
        if !self.session.restore().await? {
            return Ok(None);
        }
        match self.client.current_user().await {
            Ok(user) => {
                info!("{}: {}", "登录状态有效".green(), user.username);
                Ok(Some(user))
            }
            Err(e) if e.is_auth_error() => {
                warn!("{}: {}", "登录状态无效".red(), e);
                self.session.clear().await?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn current_user(&self) -> Result<UserInfo> {
        if !self.session.is_authenticated() {
            return Err(AuthError::NotLoggedIn);
        }
        Ok(self.client.current_user().await?)
    }
}
