use serde::Deserialize;
use serde_json::Value;

/// 统一错误响应 `{error}`，认证接口使用 `{msg}`
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    // 409 冲突时附带的任务，单独解析
    #[serde(default)]
    pub task: Option<Value>,
}

impl ErrorBody {
    pub fn text(&self) -> Option<String> {
        self.error
            .clone()
            .or_else(|| self.msg.clone())
            .or_else(|| self.message.clone())
    }
}

/// 只带提示信息的响应
#[derive(Debug, Clone, Deserialize)]
pub struct MessageResponse {
    #[serde(alias = "msg")]
    pub message: String,
}
