use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// 小说下载任务客户端
#[derive(Parser, Debug)]
#[command(name = "noveldl")]
#[command(version)]
#[command(author = "rpeng252@gmail.com")]
#[command(about = "管理小说下载任务并实时同步进度", long_about = None)]
pub struct Cli {
    /// 服务端地址
    #[arg(long, env = "NOVELDL_API", default_value = novel_tasks::config::DEFAULT_API_BASE)]
    #[arg(value_hint = clap::ValueHint::Url)]
    pub api: String,

    /// 直接指定访问令牌（不写入会话文件）
    #[arg(long, env = "NOVELDL_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// 会话文件位置
    #[arg(long, value_name = "FILE", default_value = novel_tasks::config::DEFAULT_SESSION_FILE)]
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub session_file: PathBuf,

    /// 探活间隔（秒）
    #[arg(long, default_value_t = 5)]
    pub probe_interval: u64,

    /// 实时通道最多重试次数
    #[arg(long, default_value_t = 5)]
    pub max_attempts: u32,

    /// 输出调试日志
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 登录并保存令牌
    Login {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// 登出并删除本地令牌
    Logout,
    /// 显示当前登录用户
    Whoami,
    /// 列出全部任务
    List,
    /// 添加小说并开始下载
    Add { novel_id: String },
    /// 终止任务
    Terminate { id: i64 },
    /// 删除任务
    Delete { id: i64 },
    /// 重新下载已结束的任务
    Redownload { id: i64 },
    /// 查询后台作业状态
    Status { job_id: String },
    /// 实时查看任务进度，Ctrl-C 退出
    Watch,
}
