use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::error::RepositoryError;
use super::models::{DownloadTask, TaskUpdate};

/// 仓库变更通知
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryChange {
    Replaced,
    Inserted(i64),
    Updated(i64),
    Removed(i64),
    Tombstoned(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    // 与已有记录完全相同
    Unchanged,
    // updated_at 早于已有记录，丢弃
    Stale,
    Tombstoned,
    // 删除标记指向未知任务
    Ignored,
}

impl UpsertOutcome {
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            UpsertOutcome::Inserted | UpsertOutcome::Updated | UpsertOutcome::Tombstoned
        )
    }
}

#[derive(Debug, Default)]
struct Inner {
    tasks: Vec<DownloadTask>,
    index: HashMap<i64, usize>,
}

impl Inner {
    fn reindex(&mut self) {
        self.index = self
            .tasks
            .iter()
            .enumerate()
            .map(|(pos, task)| (task.id, pos))
            .collect();
    }
}

/// 下载任务的本地权威缓存，保持插入顺序，按 id 去重。
///
/// 所有操作都是同步的短临界区，不会挂起调用方。
#[derive(Debug)]
pub struct TaskRepository {
    inner: RwLock<Inner>,
    changes: broadcast::Sender<RepositoryChange>,
}

impl Default for TaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRepository {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            inner: RwLock::new(Inner::default()),
            changes,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RepositoryChange> {
        self.changes.subscribe()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, change: RepositoryChange) {
        // 没有订阅者时发送会失败，忽略即可
        let _ = self.changes.send(change);
    }

    /// 用服务端快照整体替换，快照中不存在的任务被移除
    pub fn replace_all(&self, tasks: Vec<DownloadTask>) {
        {
            let mut inner = self.write();
            let mut next = Inner::default();
            for mut task in tasks {
                // 快照可能比已收到的推送更旧，保留较新的一条
                if let Some(&pos) = inner.index.get(&task.id) {
                    let stored = &inner.tasks[pos];
                    if stored.updated_at > task.updated_at {
                        task = stored.clone();
                    }
                }
                match next.index.get(&task.id).copied() {
                    Some(pos) => {
                        // 同一快照里重复的 id：保留首次出现的位置
                        if task.updated_at >= next.tasks[pos].updated_at {
                            next.tasks[pos] = task;
                        }
                    }
                    None => {
                        next.index.insert(task.id, next.tasks.len());
                        next.tasks.push(task);
                    }
                }
            }
            debug!("替换任务快照: {} -> {} 条", inner.tasks.len(), next.tasks.len());
            *inner = next;
        }
        self.notify(RepositoryChange::Replaced);
    }

    /// 插入或原位覆盖。updated_at 回退的记录不会被应用。
    pub fn upsert(&self, task: DownloadTask) -> UpsertOutcome {
        let id = task.id;
        let outcome = {
            let mut inner = self.write();
            match inner.index.get(&id).copied() {
                None => {
                    let pos = inner.tasks.len();
                    inner.tasks.push(task);
                    inner.index.insert(id, pos);
                    UpsertOutcome::Inserted
                }
                Some(pos) => {
                    let stored = &mut inner.tasks[pos];
                    if task.updated_at < stored.updated_at {
                        UpsertOutcome::Stale
                    } else if *stored == task {
                        UpsertOutcome::Unchanged
                    } else {
                        *stored = task;
                        UpsertOutcome::Updated
                    }
                }
            }
        };

        match outcome {
            UpsertOutcome::Inserted => self.notify(RepositoryChange::Inserted(id)),
            UpsertOutcome::Updated => self.notify(RepositoryChange::Updated(id)),
            UpsertOutcome::Stale => debug!("丢弃过期的任务更新: {}", id),
            _ => {}
        }
        outcome
    }

    /// 应用一条推送更新
    pub fn apply(&self, update: TaskUpdate) -> UpsertOutcome {
        match update {
            TaskUpdate::Snapshot(task) => self.upsert(task),
            TaskUpdate::Deleted { id } => {
                if self.mark_deleted(id) {
                    UpsertOutcome::Tombstoned
                } else {
                    UpsertOutcome::Ignored
                }
            }
        }
    }

    /// 应用未经解析的推送负载，格式错误时仓库保持不变
    pub fn upsert_raw(&self, payload: Value) -> Result<UpsertOutcome, RepositoryError> {
        match TaskUpdate::from_value(payload) {
            Ok(update) => Ok(self.apply(update)),
            Err(e) => {
                warn!("忽略无效的任务负载: {}", e);
                Err(e)
            }
        }
    }

    /// 立即移除任务（本地删除成功后使用）
    pub fn remove(&self, id: i64) -> Option<DownloadTask> {
        let removed = {
            let mut inner = self.write();
            let pos = inner.index.get(&id).copied()?;
            let task = inner.tasks.remove(pos);
            inner.reindex();
            task
        };
        self.notify(RepositoryChange::Removed(id));
        Some(removed)
    }

    /// 标记为墓碑，等待下一次快照确认
    pub fn mark_deleted(&self, id: i64) -> bool {
        let changed = {
            let mut inner = self.write();
            match inner.index.get(&id).copied() {
                Some(pos) if !inner.tasks[pos].deleted => {
                    inner.tasks[pos].deleted = true;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.notify(RepositoryChange::Tombstoned(id));
        }
        changed
    }

    pub fn get(&self, id: i64) -> Option<DownloadTask> {
        let inner = self.read();
        inner.index.get(&id).map(|&pos| inner.tasks[pos].clone())
    }

    /// 全部记录（包括墓碑），按插入顺序
    pub fn all(&self) -> Vec<DownloadTask> {
        self.read().tasks.clone()
    }

    /// 去掉墓碑后的记录
    pub fn visible(&self) -> Vec<DownloadTask> {
        self.read()
            .tasks
            .iter()
            .filter(|task| !task.deleted)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().tasks.is_empty()
    }
}
