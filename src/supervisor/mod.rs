pub mod retry;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::session::{SessionState, SessionStore};
use crate::realtime::{ChannelClient, SubscriptionHandle};
use crate::tasks::repository::TaskRepository;
use retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// 把会话生命周期绑定到实时通道：登录后连接，登出后断开，定期探活。
pub struct ConnectionSupervisor {
    channel: Arc<ChannelClient>,
    session: Arc<SessionStore>,
    repository: Arc<TaskRepository>,
    policy: RetryPolicy,
    probe_interval: Duration,
    state_tx: watch::Sender<ConnectionState>,
    subscription: Mutex<Option<SubscriptionHandle>>,
    reconnect: Notify,
    shutdown: CancellationToken,
}

impl ConnectionSupervisor {
    pub fn new(
        channel: Arc<ChannelClient>,
        session: Arc<SessionStore>,
        repository: Arc<TaskRepository>,
        policy: RetryPolicy,
        probe_interval: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            channel,
            session,
            repository,
            policy,
            probe_interval,
            state_tx,
            subscription: Mutex::new(None),
            reconnect: Notify::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// 手动重连（用户触发刷新时调用）
    pub fn reconnect(&self) {
        self.reconnect.notify_one();
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self: Arc<Self>) {
        let mut session_rx = self.session.subscribe();
        let initial = *session_rx.borrow_and_update();
        self.on_session(initial).await;

        let mut probe = tokio::time::interval(self.probe_interval);
        probe.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // 第一次 tick 立即触发，跳过
        probe.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                changed = session_rx.changed() => {
                    if changed.is_err() {
                        debug!("会话已释放，停止连接管理");
                        break;
                    }
                    let state = *session_rx.borrow_and_update();
                    self.on_session(state).await;
                }
                _ = self.reconnect.notified() => {
                    if self.session.is_authenticated() && !self.channel.is_connected() {
                        info!("手动重连实时通道");
                        self.connect_with_retry().await;
                    }
                }
                _ = probe.tick() => self.probe().await,
            }
        }

        self.channel.disconnect().await;
        self.publish(ConnectionState::Disconnected);
        info!("连接管理已停止");
    }

    async fn on_session(&self, state: SessionState) {
        match state {
            SessionState::Authenticated => {
                if !self.channel.is_connected() {
                    self.connect_with_retry().await;
                }
            }
            SessionState::Unauthenticated => {
                self.channel.disconnect().await;
                self.subscription
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                self.publish(ConnectionState::Disconnected);
            }
        }
    }

    async fn probe(&self) {
        let connected = self.channel.is_connected();
        match (self.state(), connected) {
            (ConnectionState::Connected, false) => {
                warn!("实时通道已断开");
                self.publish(ConnectionState::Disconnected);
                if self.session.is_authenticated() {
                    self.connect_with_retry().await;
                }
            }
            (_, true) => self.publish(ConnectionState::Connected),
            _ => {}
        }
    }

    fn publish(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!("连接状态: {:?} -> {:?}", current, state);
                *current = state;
                true
            }
        });
    }

    // 连接前把仓库注册为推送订阅者，替换旧的订阅
    fn bind_repository(&self) {
        let mut slot = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = slot.take() {
            self.channel.unsubscribe(old);
        }
        let repository = Arc::clone(&self.repository);
        let handle = self.channel.on_task_update(move |update| {
            repository.apply(update.clone());
        });
        *slot = Some(handle);
    }

    async fn connect_with_retry(&self) -> bool {
        let mut failures = 0u32;
        loop {
            if self.shutdown.is_cancelled() {
                return false;
            }
            let Some(token) = self.session.token() else {
                self.publish(ConnectionState::Disconnected);
                return false;
            };

            self.publish(ConnectionState::Connecting);
            self.bind_repository();

            let result = tokio::select! {
                result = self.channel.connect(Some(&token)) => result,
                _ = self.shutdown.cancelled() => {
                    debug!("连接过程中收到停止信号");
                    self.publish(ConnectionState::Disconnected);
                    return false;
                }
            };

            match result {
                Ok(_) => {
                    self.publish(ConnectionState::Connected);
                    return true;
                }
                Err(e) if !e.is_retryable() => {
                    warn!("实时通道认证失败，不再重试: {}", e);
                    self.publish(ConnectionState::Disconnected);
                    return false;
                }
                Err(e) => {
                    failures += 1;
                    if !self.policy.should_retry(failures) {
                        error!("实时通道连接失败 {} 次，放弃: {}", failures, e);
                        self.publish(ConnectionState::Disconnected);
                        return false;
                    }
                    let delay = self.policy.delay_for(failures);
                    warn!("实时通道连接失败: {}，{:?} 后重试", e, delay);
                    self.publish(ConnectionState::Disconnected);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.cancelled() => return false,
                    }
                    if !self.session.is_authenticated() {
                        return false;
                    }
                }
            }
        }
    }
}
