use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};
use url::Url;

use super::error::ChannelError;

/// 一条已建立的文本帧连接
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> Result<(), ChannelError>;

    /// 对端关闭时返回 None
    async fn recv(&mut self) -> Option<Result<String, ChannelError>>;

    async fn close(&mut self);
}

/// 负责打开物理连接
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Transport>, ChannelError>;
}

// --------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self) -> Result<Box<dyn Transport>, ChannelError> {
        info!("连接实时通道: {}", self.url);
        let (stream, response) = connect_async(self.url.as_str()).await?;
        debug!("WebSocket 握手完成: {}", response.status());
        Ok(Box::new(WsTransport { stream }))
    }
}

pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), ChannelError> {
        self.stream.send(Message::text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, ChannelError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    debug!("对端关闭连接: {:?}", frame);
                    return None;
                }
                // ping/pong 由 tungstenite 自动处理
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("关闭连接时出错: {}", e);
        }
    }
}
