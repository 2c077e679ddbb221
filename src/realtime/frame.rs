//! Socket.IO v4 / Engine.IO v4 文本帧编解码。
//!
//! Engine.IO 包类型：`0` open，`1` close，`2` ping，`3` pong，`4` message。
//! message 内的 Socket.IO 包类型：`0` connect，`1` disconnect，`2` event，`4` connect_error。

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

pub const CONNECT: &str = "40";
pub const DISCONNECT: &str = "41";
pub const PONG: &str = "3";

pub const REQUEST_AUTH: &str = "request_auth";
pub const AUTH_RESPONSE: &str = "auth_response";
pub const TASK_UPDATE: &str = "task_update";
pub const AUTHENTICATE: &str = "authenticate";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("空帧")]
    Empty,

    #[error("未知的包类型: {0}")]
    UnknownPacket(String),

    #[error("事件格式错误: {0}")]
    BadEvent(String),
}

/// Engine.IO 握手参数
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

impl OpenInfo {
    /// 服务端每隔 pingInterval 发一次 ping，超过 pingInterval + pingTimeout 没有任何帧即视为连接已死。
    /// 服务端未声明时返回 None
    pub fn liveness(&self) -> Option<Duration> {
        match self.ping_interval.saturating_add(self.ping_timeout) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// 服务端推送的事件
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    RequestAuth { message: String },
    AuthResponse { success: bool, message: String },
    TaskUpdate(Value),
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    Connect,
    Disconnect,
    ConnectError(String),
    Event(ServerEvent),
}

/// 客户端发出的事件
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Authenticate { token: String },
}

impl ClientEvent {
    pub fn encode(&self) -> String {
        let (name, payload) = match self {
            ClientEvent::Authenticate { token } => (AUTHENTICATE, json!({ "token": token })),
        };
        format!("42{}", json!([name, payload]))
    }
}

pub fn decode(text: &str) -> Result<Frame, FrameError> {
    let mut chars = text.chars();
    let engine = chars.next().ok_or(FrameError::Empty)?;
    let rest = chars.as_str();

    match engine {
        '0' => serde_json::from_str::<OpenInfo>(rest)
            .map(Frame::Open)
            .map_err(|e| FrameError::BadEvent(e.to_string())),
        '1' => Ok(Frame::Close),
        '2' => Ok(Frame::Ping),
        '3' => Ok(Frame::Pong),
        '4' => decode_socket(rest),
        other => Err(FrameError::UnknownPacket(other.to_string())),
    }
}

fn decode_socket(text: &str) -> Result<Frame, FrameError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(FrameError::Empty)?;
    let rest = chars.as_str();

    match kind {
        '0' => Ok(Frame::Connect),
        '1' => Ok(Frame::Disconnect),
        '2' => decode_event(rest).map(Frame::Event),
        '4' => {
            let message = serde_json::from_str::<Value>(rest)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| rest.to_string());
            Ok(Frame::ConnectError(message))
        }
        other => Err(FrameError::UnknownPacket(format!("4{}", other))),
    }
}

fn decode_event(text: &str) -> Result<ServerEvent, FrameError> {
    // 可能带命名空间前缀或 ack id，跳到数组开头
    let start = text
        .find('[')
        .ok_or_else(|| FrameError::BadEvent(text.to_string()))?;
    let items: Vec<Value> = serde_json::from_str(&text[start..])
        .map_err(|e| FrameError::BadEvent(e.to_string()))?;

    let mut items = items.into_iter();
    let name = match items.next() {
        Some(Value::String(name)) => name,
        _ => return Err(FrameError::BadEvent("缺少事件名".to_string())),
    };
    let payload = items.next().unwrap_or(Value::Null);

    let message_of = |payload: &Value| {
        payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    Ok(match name.as_str() {
        REQUEST_AUTH => ServerEvent::RequestAuth {
            message: message_of(&payload),
        },
        AUTH_RESPONSE => ServerEvent::AuthResponse {
            success: payload
                .get("success")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            message: message_of(&payload),
        },
        TASK_UPDATE => ServerEvent::TaskUpdate(payload),
        _ => ServerEvent::Other(name),
    })
}

/// 测试与模拟服务端使用的编码
pub fn encode_server_event(name: &str, payload: &Value) -> String {
    format!("42{}", json!([name, payload]))
}
