use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use tokio::sync::watch;
use tracing::{info, warn};

use super::errors::Result;
use super::token::TokenInfo;

/// 会话状态，由连接管理器订阅
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
}

/// 保存当前令牌。只有登录和登出会写入，REST 客户端与实时通道只读。
#[derive(Debug)]
pub struct SessionStore {
    current: RwLock<Option<TokenInfo>>,
    state_tx: watch::Sender<SessionState>,
    path: Option<PathBuf>,
}

impl SessionStore {
    /// 仅保存在内存中的会话
    pub fn in_memory() -> Self {
        Self::build(None)
    }

    /// 令牌会持久化到 `path`
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        Self::build(Some(path.into()))
    }

    fn build(path: Option<PathBuf>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Unauthenticated);
        Self {
            current: RwLock::new(None),
            state_tx,
            path,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == SessionState::Authenticated
    }

    pub fn token(&self) -> Option<String> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|info| info.access_token.clone())
    }

    pub fn token_info(&self) -> Option<TokenInfo> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, state: SessionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    /// 从磁盘恢复上一次的登录状态
    pub async fn restore(&self) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        match TokenInfo::load(path).await? {
            Some(info) => {
                info!("已从 {} 恢复登录状态", path.display());
                *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(info);
                self.publish(SessionState::Authenticated);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 登录成功后写入令牌
    pub async fn set_token(&self, info: TokenInfo) -> Result<()> {
        if let Some(path) = &self.path {
            info.save(path).await?;
        }
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(info);
        self.publish(SessionState::Authenticated);
        Ok(())
    }

    /// 登出：清除内存与磁盘上的令牌
    pub async fn clear(&self) -> Result<()> {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.publish(SessionState::Unauthenticated);
        if let Some(path) = &self.path {
            if let Err(e) = TokenInfo::remove(path).await {
                warn!("删除令牌文件失败: {}", e);
                return Err(e);
            }
        }
        Ok(())
    }
}
