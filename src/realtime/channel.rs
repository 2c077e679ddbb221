use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::error::Elapsed;
use tracing::{debug, info, warn};

use super::error::ChannelError;
use super::frame::{self, ClientEvent, Frame, ServerEvent};
use super::subscribers::{SubscriptionHandle, Subscribers};
use super::transport::{Connector, Transport};
use crate::tasks::models::TaskUpdate;

struct Connection {
    shutdown: oneshot::Sender<()>,
    pump: JoinHandle<()>,
}

/// 实时通道客户端：一条物理连接，完成认证握手后把任务推送分发给订阅者。
///
/// 连接断开后不会自动重连，由 [`ConnectionSupervisor`](crate::supervisor::ConnectionSupervisor) 负责。
pub struct ChannelClient {
    connector: Arc<dyn Connector>,
    handshake_timeout: Duration,
    // 同时只允许一个 connect/disconnect 在进行
    connection: Mutex<Option<Connection>>,
    connected: Arc<AtomicBool>,
    subscribers: Arc<Subscribers<TaskUpdate>>,
}

impl ChannelClient {
    pub fn new(connector: Arc<dyn Connector>, handshake_timeout: Duration) -> Self {
        Self {
            connector,
            handshake_timeout,
            connection: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            subscribers: Arc::new(Subscribers::default()),
        }
    }

    /// 建立连接并完成认证。已连接时直接返回 true，不会打开第二条连接。
    pub async fn connect(&self, token: Option<&str>) -> Result<bool, ChannelError> {
        let mut slot = self.connection.lock().await;

        if slot.is_some() {
            if self.is_connected() {
                debug!("实时通道已连接，跳过");
                return Ok(true);
            }
            // 上一条连接已经断开，回收后台任务
            if let Some(stale) = slot.take() {
                stale.pump.abort();
            }
        }

        let token = match token {
            Some(t) if !t.is_empty() => t,
            _ => return Err(ChannelError::MissingToken),
        };

        let mut transport = self.connector.open().await?;

        let result = tokio::time::timeout(
            self.handshake_timeout,
            handshake(transport.as_mut(), token),
        )
        .await
        .unwrap_or(Err(ChannelError::HandshakeTimeout));

        let liveness = match result {
            Ok(liveness) => liveness,
            Err(e) => {
                warn!("实时通道握手失败: {}", e);
                transport.close().await;
                return Err(e);
            }
        };

        self.connected.store(true, Ordering::SeqCst);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let pump = tokio::spawn(pump(
            transport,
            liveness,
            shutdown_rx,
            Arc::clone(&self.connected),
            Arc::clone(&self.subscribers),
        ));
        *slot = Some(Connection {
            shutdown: shutdown_tx,
            pump,
        });

        info!("实时通道认证成功");
        Ok(true)
    }

    /// 断开连接并清空订阅者，可重复调用
    pub async fn disconnect(&self) {
        let connection = self.connection.lock().await.take();
        self.connected.store(false, Ordering::SeqCst);
        self.subscribers.clear();

        if let Some(Connection { shutdown, pump }) = connection {
            let _ = shutdown.send(());
            if let Err(e) = pump.await {
                debug!("实时通道后台任务退出异常: {}", e);
            }
            info!("实时通道已断开");
        }
    }

    /// 注册任务更新回调，回调按推送到达顺序同步执行
    pub fn on_task_update<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&TaskUpdate) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.subscribers.unsubscribe(handle)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// request_auth -> authenticate -> auth_response
///
/// 成功时返回服务端声明的存活窗口
async fn handshake(
    transport: &mut dyn Transport,
    token: &str,
) -> Result<Option<Duration>, ChannelError> {
    let mut liveness = None;
    loop {
        let text = match transport.recv().await {
            Some(Ok(text)) => text,
            Some(Err(e)) => return Err(e),
            None => return Err(ChannelError::ClosedDuringHandshake),
        };

        let frame = match frame::decode(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("握手阶段忽略无效帧: {} ({})", text, e);
                continue;
            }
        };

        match frame {
            Frame::Open(info) => {
                debug!(
                    "Engine.IO 已打开: sid={} pingInterval={}ms pingTimeout={}ms",
                    info.sid, info.ping_interval, info.ping_timeout
                );
                liveness = info.liveness();
                transport.send(frame::CONNECT.to_string()).await?;
            }
            Frame::Connect => debug!("Socket.IO 命名空间已连接"),
            Frame::Ping => transport.send(frame::PONG.to_string()).await?,
            Frame::Event(ServerEvent::RequestAuth { message }) => {
                debug!("服务端要求认证: {}", message);
                let auth = ClientEvent::Authenticate {
                    token: token.to_string(),
                };
                transport.send(auth.encode()).await?;
            }
            Frame::Event(ServerEvent::AuthResponse { success: true, .. }) => return Ok(liveness),
            Frame::Event(ServerEvent::AuthResponse {
                success: false,
                message,
            }) => return Err(ChannelError::AuthRejected(message)),
            Frame::ConnectError(message) => return Err(ChannelError::AuthRejected(message)),
            Frame::Close | Frame::Disconnect => return Err(ChannelError::ClosedDuringHandshake),
            other => debug!("握手阶段忽略: {:?}", other),
        }
    }
}

/// 连接建立后的读循环，独占 transport。
/// 超过 `liveness` 没有收到任何帧时按断线处理。
async fn pump(
    mut transport: Box<dyn Transport>,
    liveness: Option<Duration>,
    mut shutdown: oneshot::Receiver<()>,
    connected: Arc<AtomicBool>,
    subscribers: Arc<Subscribers<TaskUpdate>>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = transport.send(frame::DISCONNECT.to_string()).await;
                transport.close().await;
                break;
            }
            incoming = recv_within(transport.as_mut(), liveness) => {
                let text = match incoming {
                    Ok(Some(Ok(text))) => text,
                    Ok(Some(Err(e))) => {
                        warn!("实时通道读取失败: {}", e);
                        break;
                    }
                    Ok(None) => {
                        info!("服务端关闭了实时通道");
                        break;
                    }
                    Err(_) => {
                        warn!("实时通道超过 {:?} 未收到任何帧，视为已断开", liveness);
                        transport.close().await;
                        break;
                    }
                };

                match frame::decode(&text) {
                    Ok(Frame::Ping) => {
                        if let Err(e) = transport.send(frame::PONG.to_string()).await {
                            warn!("发送 pong 失败: {}", e);
                            break;
                        }
                    }
                    Ok(Frame::Event(ServerEvent::TaskUpdate(payload))) => {
                        match TaskUpdate::from_value(payload) {
                            Ok(update) => subscribers.emit(&update),
                            Err(e) => warn!("丢弃无法解析的任务推送: {}", e),
                        }
                    }
                    Ok(Frame::Close | Frame::Disconnect) => {
                        info!("服务端断开了实时通道");
                        break;
                    }
                    Ok(other) => debug!("忽略帧: {:?}", other),
                    Err(e) => warn!("忽略无效帧: {} ({})", text, e),
                }
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}

async fn recv_within(
    transport: &mut dyn Transport,
    liveness: Option<Duration>,
) -> Result<Option<Result<String, ChannelError>>, Elapsed> {
    match liveness {
        Some(window) => tokio::time::timeout(window, transport.recv()).await,
        None => Ok(transport.recv().await),
    }
}
