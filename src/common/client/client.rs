use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, ClientBuilder, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};
use url::Url;

use super::api::TaskApi;
use super::error::ApiError;
use super::models::common::{ErrorBody, MessageResponse};
use super::models::task::{AddNovelRequest, JobStatus, TaskActionResponse, TaskListResponse};
use super::models::user_info::{LoginRequest, LoginResponse, UserInfo};
use crate::auth::session::SessionStore;
use crate::config::ClientConfig;
use crate::tasks::models::DownloadTask;

// 自动携带 Bearer 令牌的客户端
#[derive(Debug, Clone)]
pub struct NovelClient {
    inner: Client,
    base: Url,
    session: Arc<SessionStore>,
}

impl NovelClient {
    pub fn new(config: &ClientConfig, session: Arc<SessionStore>) -> Result<Self, ApiError> {
        let inner = ClientBuilder::new()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(5))
            .default_headers(Self::get_default_headers())
            .build()?;

        Ok(Self {
            inner,
            base: config.api_base.clone(),
            session,
        })
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("noveldl/", env!("CARGO_PKG_VERSION"))),
        );
        headers
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base.join(path)?)
    }

    // 需要认证的请求：没有令牌时直接失败，不发请求
    fn authed(&self, builder: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        match self.session.token() {
            Some(token) => Ok(builder.bearer_auth(token)),
            None => Err(ApiError::AuthRequired),
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let resp = builder.send().await.map_err(|e| {
            error!("请求失败: {}", e);
            ApiError::Reqwest(e)
        })?;
        Self::handle_response::<T>(resp).await
    }

    async fn handle_response<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
        let status = resp.status();
        let url = resp.url().to_string();
        let raw_body = resp.bytes().await?;

        if status.is_success() {
            return serde_json::from_slice::<T>(&raw_body).map_err(|e| {
                error!("失败的请求的URL: {}", url);
                error!("期望的结构 可能是: {}", std::any::type_name::<T>());
                ApiError::InvalidResponse(format!(
                    "结构匹配失败: {}. 响应: {}",
                    e,
                    String::from_utf8_lossy(&raw_body)
                ))
            });
        }

        let body: ErrorBody = serde_json::from_slice(&raw_body).unwrap_or_default();
        let message = body.text().unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string()
        });
        warn!("请求 {} 返回 {}: {}", url, status, message);

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::UNPROCESSABLE_ENTITY => {
                ApiError::Unauthorized(message)
            }
            StatusCode::CONFLICT => {
                let task = body
                    .task
                    .and_then(|value| serde_json::from_value::<DownloadTask>(value).ok())
                    .map(Box::new);
                ApiError::Conflict { message, task }
            }
            s if s.is_server_error() => ApiError::Server {
                status: s.as_u16(),
                message,
            },
            s => ApiError::Rejected {
                status: s.as_u16(),
                message,
            },
        })
    }

    /// 用户名密码登录，返回访问令牌
    pub async fn login(&self, username: &str, password: &str) -> Result<String, ApiError> {
        let url = self.endpoint("api/auth/login")?;
        let resp: LoginResponse = self
            .send(
                self.inner
                    .post(url)
                    .json(&LoginRequest { username, password }),
            )
            .await?;
        Ok(resp.access_token)
    }

    pub async fn current_user(&self) -> Result<UserInfo, ApiError> {
        let url = self.endpoint("api/auth/me")?;
        self.send(self.authed(self.inner.get(url))?).await
    }
}

#[async_trait]
impl TaskApi for NovelClient {
    async fn list_tasks(&self) -> Result<Vec<DownloadTask>, ApiError> {
        let url = self.endpoint("api/tasks/list")?;
        let resp: TaskListResponse = self.send(self.authed(self.inner.get(url))?).await?;
        debug!("获取到 {} 个任务", resp.tasks.len());
        Ok(resp.tasks)
    }

    async fn terminate(&self, id: i64) -> Result<TaskActionResponse, ApiError> {
        let url = self.endpoint(&format!("api/tasks/{}/terminate", id))?;
        self.send(self.authed(self.inner.post(url))?).await
    }

    async fn delete(&self, id: i64) -> Result<MessageResponse, ApiError> {
        let url = self.endpoint(&format!("api/tasks/{}", id))?;
        self.send(self.authed(self.inner.delete(url))?).await
    }

    async fn redownload(&self, id: i64) -> Result<TaskActionResponse, ApiError> {
        let url = self.endpoint(&format!("api/tasks/{}/redownload", id))?;
        self.send(self.authed(self.inner.post(url))?).await
    }

    async fn add_novel(&self, novel_id: &str) -> Result<DownloadTask, ApiError> {
        let url = self.endpoint("api/novels")?;
        let builder = self.inner.post(url).json(&AddNovelRequest { novel_id });
        self.send(self.authed(builder)?).await
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatus, ApiError> {
        let url = self.endpoint(&format!("api/tasks/status/{}", job_id))?;
        self.send(self.authed(self.inner.get(url))?).await
    }
}
