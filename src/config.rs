use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::supervisor::retry::RetryPolicy;

pub const DEFAULT_API_BASE: &str = "http://localhost:5000/";
pub const DEFAULT_SESSION_FILE: &str = "./sessions/session.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("无效的服务地址: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("不支持的协议: {0}")]
    UnsupportedScheme(String),
}

/// 客户端配置
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // 以 `/` 结尾，接口路径在其上拼接
    pub api_base: Url,
    pub realtime_url: Url,
    pub request_timeout: Duration,
    pub handshake_timeout: Duration,
    pub probe_interval: Duration,
    pub retry: RetryPolicy,
    pub session_file: PathBuf,
}

impl ClientConfig {
    pub fn new(api_base: &str) -> Result<Self, ConfigError> {
        let api_base = normalize_base(api_base)?;
        let realtime_url = realtime_url_for(&api_base)?;
        Ok(Self {
            api_base,
            realtime_url,
            request_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            probe_interval: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            session_file: PathBuf::from(DEFAULT_SESSION_FILE),
        })
    }

    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_file = path.into();
        self
    }
}

fn normalize_base(raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Socket.IO 的 WebSocket 入口：http -> ws，https -> wss
fn realtime_url_for(api_base: &Url) -> Result<Url, ConfigError> {
    let scheme = match api_base.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };
    let mut url = api_base.join("socket.io/")?;
    url.set_scheme(scheme)
        .map_err(|_| ConfigError::UnsupportedScheme(scheme.to_string()))?;
    url.set_query(Some("EIO=4&transport=websocket"));
    Ok(url)
}
