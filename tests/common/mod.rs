#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::{Value, json};
use tokio::sync::{Semaphore, mpsc};

use novel_tasks::common::client::api::TaskApi;
use novel_tasks::common::client::error::ApiError;
use novel_tasks::common::client::models::common::MessageResponse;
use novel_tasks::common::client::models::task::{JobStatus, TaskActionResponse};
use novel_tasks::realtime::frame::encode_server_event;
use novel_tasks::realtime::{ChannelError, Connector, Transport};
use novel_tasks::tasks::{DownloadTask, NovelSnapshot, TaskStatus};

pub fn at(secs: i64) -> NaiveDateTime {
    let base = NaiveDateTime::parse_from_str("2025-05-01T10:00:00", "%Y-%m-%dT%H:%M:%S").unwrap();
    base + chrono::Duration::seconds(secs)
}

pub fn task(id: i64, status: TaskStatus, progress: f64) -> DownloadTask {
    task_at(id, status, progress, 0)
}

pub fn task_at(id: i64, status: TaskStatus, progress: f64, updated: i64) -> DownloadTask {
    DownloadTask {
        id,
        user_id: 1,
        novel_id: format!("novel-{}", id),
        novel: Some(NovelSnapshot {
            id: format!("novel-{}", id),
            title: format!("第{}本小说", id),
            author: None,
        }),
        worker_job_id: None,
        status,
        progress,
        message: None,
        created_at: Some(at(0)),
        updated_at: at(updated),
        deleted: false,
    }
}

/// 轮询直到条件成立，最多等两秒
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("条件在超时前未满足");
}

// --------------------------------------------------------------------
// 模拟 REST 服务端

pub struct FakeApi {
    pub tasks: Mutex<Vec<DownloadTask>>,
    pub calls: Mutex<Vec<String>>,
    // 为 true 时变更类接口会等待 release
    pub hold: AtomicBool,
    gate: Semaphore,
    pub fail_with: Mutex<Option<(u16, String)>>,
}

impl FakeApi {
    pub fn with_tasks(tasks: Vec<DownloadTask>) -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(tasks),
            calls: Mutex::new(Vec::new()),
            hold: AtomicBool::new(false),
            gate: Semaphore::new(0),
            fail_with: Mutex::new(None),
        })
    }

    /// 放行 `n` 个被挂起的请求
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_next(&self, status: u16, message: &str) {
        *self.fail_with.lock().unwrap() = Some((status, message.to_string()));
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn take_failure(&self) -> Result<(), ApiError> {
        match self.fail_with.lock().unwrap().take() {
            Some((status, message)) if status >= 500 => Err(ApiError::Server { status, message }),
            Some((_, message)) => Err(ApiError::Rejected {
                status: 400,
                message,
            }),
            None => Ok(()),
        }
    }

    async fn gate(&self) {
        if self.hold.load(Ordering::SeqCst) {
            self.gate.acquire().await.unwrap().forget();
        }
    }

    fn mutate(&self, id: i64, f: impl FnOnce(&mut DownloadTask)) -> Result<DownloadTask, ApiError> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| ApiError::Rejected {
                status: 404,
                message: "Task not found or access denied".to_string(),
            })?;
        f(task);
        task.updated_at += chrono::Duration::seconds(1);
        Ok(task.clone())
    }
}

#[async_trait]
impl TaskApi for FakeApi {
    async fn list_tasks(&self) -> Result<Vec<DownloadTask>, ApiError> {
        self.record("list".to_string());
        self.take_failure()?;
        Ok(self.tasks.lock().unwrap().clone())
    }

    async fn terminate(&self, id: i64) -> Result<TaskActionResponse, ApiError> {
        self.record(format!("terminate:{}", id));
        self.gate().await;
        self.take_failure()?;
        let task = self.mutate(id, |t| {
            t.status = TaskStatus::Terminated;
            t.message = Some("Task terminated by user.".to_string());
        })?;
        Ok(TaskActionResponse {
            message: "Task termination signal sent.".to_string(),
            task,
        })
    }

    async fn delete(&self, id: i64) -> Result<MessageResponse, ApiError> {
        self.record(format!("delete:{}", id));
        self.gate().await;
        self.take_failure()?;
        self.tasks.lock().unwrap().retain(|t| t.id != id);
        Ok(MessageResponse {
            message: "Task deleted successfully.".to_string(),
        })
    }

    async fn redownload(&self, id: i64) -> Result<TaskActionResponse, ApiError> {
        self.record(format!("redownload:{}", id));
        self.gate().await;
        self.take_failure()?;
        let task = self.mutate(id, |t| {
            t.status = TaskStatus::Pending;
            t.progress = 0.0;
            t.message = Some("Re-download requested.".to_string());
        })?;
        Ok(TaskActionResponse {
            message: "Re-download task queued.".to_string(),
            task,
        })
    }

    async fn add_novel(&self, novel_id: &str) -> Result<DownloadTask, ApiError> {
        self.record(format!("add:{}", novel_id));
        self.gate().await;
        self.take_failure()?;
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(active) = tasks
            .iter()
            .find(|t| t.novel_id == novel_id && t.status.is_active())
        {
            return Err(ApiError::Conflict {
                message: format!("Task is already active with status {}.", active.status),
                task: Some(Box::new(active.clone())),
            });
        }
        let id = tasks.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        let mut created = task_at(id, TaskStatus::Pending, 0.0, 10);
        created.novel_id = novel_id.to_string();
        tasks.push(created.clone());
        Ok(created)
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatus, ApiError> {
        self.record(format!("status:{}", job_id));
        self.take_failure()?;
        Ok(JobStatus {
            task_id: job_id.to_string(),
            status: "PROGRESS".to_string(),
            result: Some("Task in progress.".to_string()),
            meta: Some(json!({"current": 3, "total": 10})),
            traceback: None,
        })
    }
}

// --------------------------------------------------------------------
// 内存中的 Socket.IO 服务端

pub struct MemoryTransport {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, text: String) -> Result<(), ChannelError> {
        self.outgoing
            .send(text)
            .map_err(|_| ChannelError::Transport("对端已关闭".to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ChannelError>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.incoming.close();
    }
}

pub struct FakeServer {
    valid_token: String,
    pub opens: AtomicUsize,
    // 前几次连接直接失败
    pub fail_opens: AtomicUsize,
    // 为 true 时收到 authenticate 后不回应
    pub silent_auth: AtomicBool,
    // open 帧里声明的 (pingInterval, pingTimeout)，单位毫秒
    pub ping_settings: Mutex<(u64, u64)>,
    clients: Arc<Mutex<Vec<mpsc::UnboundedSender<String>>>>,
    received: Arc<Mutex<Vec<String>>>,
}

impl FakeServer {
    pub fn new(valid_token: &str) -> Arc<Self> {
        Arc::new(Self {
            valid_token: valid_token.to_string(),
            opens: AtomicUsize::new(0),
            fail_opens: AtomicUsize::new(0),
            silent_auth: AtomicBool::new(false),
            ping_settings: Mutex::new((25000, 20000)),
            clients: Arc::new(Mutex::new(Vec::new())),
            received: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    pub fn authenticated_clients(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    pub fn push(&self, name: &str, payload: Value) {
        self.push_raw(&encode_server_event(name, &payload));
    }

    pub fn push_raw(&self, text: &str) {
        for client in self.clients.lock().unwrap().iter() {
            let _ = client.send(text.to_string());
        }
    }

    /// 模拟服务端主动断开
    pub fn drop_connections(&self) {
        let mut clients = self.clients.lock().unwrap();
        for client in clients.iter() {
            let _ = client.send("1".to_string());
        }
        clients.clear();
    }
}

#[async_trait]
impl Connector for FakeServer {
    async fn open(&self) -> Result<Box<dyn Transport>, ChannelError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ChannelError::Transport("connection refused".to_string()));
        }

        let (to_client, client_rx) = mpsc::unbounded_channel::<String>();
        let (client_tx, mut from_client) = mpsc::unbounded_channel::<String>();
        let valid = self.valid_token.clone();
        let silent = self.silent_auth.load(Ordering::SeqCst);
        let (ping_interval, ping_timeout) = *self.ping_settings.lock().unwrap();
        let clients = Arc::clone(&self.clients);
        let received = Arc::clone(&self.received);

        tokio::spawn(async move {
            let _ = to_client.send(format!(
                "0{}",
                json!({
                    "sid": "e1",
                    "upgrades": [],
                    "pingInterval": ping_interval,
                    "pingTimeout": ping_timeout
                })
            ));
            while let Some(frame) = from_client.recv().await {
                received.lock().unwrap().push(frame.clone());
                if frame == "40" {
                    let _ = to_client.send(r#"40{"sid":"n1"}"#.to_string());
                    let _ = to_client.send(encode_server_event(
                        "request_auth",
                        &json!({"message": "Please authenticate with your JWT token."}),
                    ));
                } else if let Some(body) = frame.strip_prefix("42") {
                    let event: Value = serde_json::from_str(body).unwrap();
                    if event[0] != "authenticate" || silent {
                        continue;
                    }
                    if event[1]["token"] == valid.as_str() {
                        let _ = to_client.send(encode_server_event(
                            "auth_response",
                            &json!({"success": true, "message": "Authentication successful."}),
                        ));
                        clients.lock().unwrap().push(to_client.clone());
                    } else {
                        let _ = to_client.send(encode_server_event(
                            "auth_response",
                            &json!({"success": false, "message": "bad token"}),
                        ));
                    }
                }
            }
        });

        Ok(Box::new(MemoryTransport {
            incoming: client_rx,
            outgoing: client_tx,
        }))
    }
}

pub fn wire_task(id: i64, status: &str, progress: Value, updated_at: &str) -> Value {
    json!({
        "id": id,
        "user_id": 1,
        "novel_id": format!("novel-{}", id),
        "novel": {"id": format!("novel-{}", id), "title": format!("第{}本小说", id), "author": null},
        "celery_task_id": "job-1",
        "status": status,
        "progress": progress,
        "message": null,
        "created_at": "2025-05-01T10:00:00",
        "updated_at": updated_at
    })
}
