use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::errors::Result;

/// 持久化到本地的登录令牌
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenInfo {
    pub access_token: String,
    #[serde(default)]
    pub username: Option<String>,
    pub saved_at: DateTime<Utc>,
}

impl TokenInfo {
    pub fn new(access_token: impl Into<String>, username: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            username,
            saved_at: Utc::now(),
        }
    }

    /// 读取令牌文件，文件不存在时返回 None
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        match tokio::fs::read(path).await {
            Ok(data) => {
                let info: TokenInfo = serde_json::from_slice(&data)?;
                if info.access_token.is_empty() {
                    return Ok(None);
                }
                Ok(Some(info))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let data = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, data).await?;
        debug!("令牌已保存: {}", path.display());
        Ok(())
    }

    pub async fn remove(path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
