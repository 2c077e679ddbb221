use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
}

/// 当前登录用户
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
}
