use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info, warn};

use super::error::ActionError;
use super::models::{DownloadTask, TaskStatus};
use super::repository::TaskRepository;
use crate::common::client::api::TaskApi;
use crate::common::client::error::ApiError;
use crate::common::client::models::task::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Terminate,
    Delete,
    Redownload,
}

impl ActionKind {
    /// 该操作允许的起始状态
    pub fn allowed_from(self, status: TaskStatus) -> bool {
        match self {
            ActionKind::Terminate => status.is_active(),
            ActionKind::Redownload => status.is_finished(),
            ActionKind::Delete => true,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Terminate => "终止",
            ActionKind::Delete => "删除",
            ActionKind::Redownload => "重新下载",
        };
        f.write_str(name)
    }
}

/// 操作未执行的原因
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    UnknownTask(i64),
    InFlight(ActionKind),
    StatusNotAllowed {
        action: ActionKind,
        status: TaskStatus,
    },
    AddInFlight(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    // 删除成功时没有返回记录
    Performed(Option<DownloadTask>),
    NotPerformed(Rejection),
}

impl ActionOutcome {
    pub fn is_performed(&self) -> bool {
        matches!(self, ActionOutcome::Performed(_))
    }
}

// 离开作用域即释放占用
struct InFlightGuard<'a> {
    map: &'a DashMap<i64, ActionKind>,
    id: i64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.id);
    }
}

struct AddGuard<'a> {
    map: &'a DashMap<String, ()>,
    novel_id: String,
}

impl Drop for AddGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.novel_id);
    }
}

/// 串行化同一任务上的终止、删除、重新下载，并把结果写回仓库。
/// 不同任务上的操作可以并发。
pub struct TaskActions {
    api: Arc<dyn TaskApi>,
    repository: Arc<TaskRepository>,
    in_flight: DashMap<i64, ActionKind>,
    pending_adds: DashMap<String, ()>,
    last_error: Mutex<Option<String>>,
}

impl TaskActions {
    pub fn new(api: Arc<dyn TaskApi>, repository: Arc<TaskRepository>) -> Self {
        Self {
            api,
            repository,
            in_flight: DashMap::new(),
            pending_adds: DashMap::new(),
            last_error: Mutex::new(None),
        }
    }

    pub fn repository(&self) -> &Arc<TaskRepository> {
        &self.repository
    }

    /// 正在进行的操作，用于行内加载状态
    pub fn in_flight(&self, id: i64) -> Option<ActionKind> {
        self.in_flight.get(&id).map(|entry| *entry.value())
    }

    /// 最近一次拉取列表失败的错误信息
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_last_error(&self, message: Option<String>) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = message;
    }

    fn acquire(&self, id: i64, kind: ActionKind) -> Result<InFlightGuard<'_>, ActionKind> {
        match self.in_flight.entry(id) {
            Entry::Occupied(entry) => Err(*entry.get()),
            Entry::Vacant(entry) => {
                entry.insert(kind);
                Ok(InFlightGuard {
                    map: &self.in_flight,
                    id,
                })
            }
        }
    }

    /// 拉取任务列表并整体替换仓库；失败时保留已有数据
    pub async fn refresh(&self) -> Result<usize, ActionError> {
        match self.api.list_tasks().await {
            Ok(tasks) => {
                let count = tasks.len();
                self.repository.replace_all(tasks);
                self.set_last_error(None);
                Ok(count)
            }
            Err(e) => {
                warn!("获取任务列表失败: {}", e);
                self.set_last_error(Some(e.to_string()));
                Err(ActionError::Fetch(e))
            }
        }
    }

    pub async fn terminate(&self, id: i64) -> Result<ActionOutcome, ActionError> {
        self.run(id, ActionKind::Terminate).await
    }

    pub async fn delete(&self, id: i64) -> Result<ActionOutcome, ActionError> {
        self.run(id, ActionKind::Delete).await
    }

    pub async fn redownload(&self, id: i64) -> Result<ActionOutcome, ActionError> {
        self.run(id, ActionKind::Redownload).await
    }

    async fn run(&self, id: i64, kind: ActionKind) -> Result<ActionOutcome, ActionError> {
        let _guard = match self.acquire(id, kind) {
            Ok(guard) => guard,
            Err(current) => {
                debug!("任务 {} 上的{}操作尚未完成，忽略{}", id, current, kind);
                return Ok(ActionOutcome::NotPerformed(Rejection::InFlight(current)));
            }
        };

        let stored = match self.repository.get(id) {
            Some(task) if !task.deleted => task,
            _ => return Ok(ActionOutcome::NotPerformed(Rejection::UnknownTask(id))),
        };

        if !kind.allowed_from(stored.status) {
            debug!("任务 {} 状态为 {}，不能{}", id, stored.status, kind);
            return Ok(ActionOutcome::NotPerformed(Rejection::StatusNotAllowed {
                action: kind,
                status: stored.status,
            }));
        }

        let result = match kind {
            ActionKind::Terminate => self.api.terminate(id).await.map(|resp| Some(resp.task)),
            ActionKind::Redownload => self.api.redownload(id).await.map(|resp| Some(resp.task)),
            ActionKind::Delete => self.api.delete(id).await.map(|_| None),
        };

        match result {
            Ok(Some(task)) => {
                let outcome = self.repository.upsert(task.clone());
                info!("{}任务 {} 成功 ({:?})", kind, id, outcome);
                Ok(ActionOutcome::Performed(Some(task)))
            }
            Ok(None) => {
                self.repository.remove(id);
                info!("{}任务 {} 成功", kind, id);
                Ok(ActionOutcome::Performed(None))
            }
            Err(source) => {
                warn!("{}任务 {} 失败: {}", kind, id, source);
                Err(ActionError::Api {
                    action: kind,
                    id,
                    source,
                })
            }
        }
    }

    /// 为小说创建下载任务。同一小说的重复提交会被忽略。
    pub async fn add_novel(&self, novel_id: &str) -> Result<ActionOutcome, ActionError> {
        let _guard = match self.pending_adds.entry(novel_id.to_string()) {
            Entry::Occupied(_) => {
                return Ok(ActionOutcome::NotPerformed(Rejection::AddInFlight(
                    novel_id.to_string(),
                )));
            }
            Entry::Vacant(entry) => {
                entry.insert(());
                AddGuard {
                    map: &self.pending_adds,
                    novel_id: novel_id.to_string(),
                }
            }
        };

        match self.api.add_novel(novel_id).await {
            Ok(task) => {
                self.repository.upsert(task.clone());
                info!("已创建任务 {} (小说 {})", task.id, novel_id);
                Ok(ActionOutcome::Performed(Some(task)))
            }
            Err(source) => {
                // 冲突时服务端附带的是权威记录，可以直接写入
                if let ApiError::Conflict {
                    task: Some(task), ..
                } = &source
                {
                    self.repository.upsert(task.as_ref().clone());
                }
                warn!("添加小说 {} 失败: {}", novel_id, source);
                Err(ActionError::Add {
                    novel_id: novel_id.to_string(),
                    source,
                })
            }
        }
    }

    /// 查询后台作业的细粒度状态
    pub async fn job_status(&self, worker_job_id: &str) -> Result<JobStatus, ApiError> {
        self.api.job_status(worker_job_id).await
    }
}
