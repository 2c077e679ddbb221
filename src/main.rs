use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use clap::Parser;
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use novel_tasks::auth::{AuthManager, SessionStore, TokenInfo};
use novel_tasks::common::client::client::NovelClient;
use novel_tasks::common::logger::PrettyLogger;
use novel_tasks::realtime::{ChannelClient, WsConnector};
use novel_tasks::tasks::{
    ActionError, ActionOutcome, DownloadTask, Rejection, TaskActions, TaskRepository,
};
use novel_tasks::{
    ClientConfig, ConnectionState, ConnectionSupervisor, log_error, log_info, log_success,
    log_warning,
};

mod cli;

/// 输出操作结果
fn report(outcome: &ActionOutcome) {
    match outcome {
        ActionOutcome::Performed(Some(task)) => {
            log_success!("操作成功");
            PrettyLogger::task_row(task);
        }
        ActionOutcome::Performed(None) => log_success!("任务已删除"),
        ActionOutcome::NotPerformed(Rejection::UnknownTask(id)) => {
            log_warning!("任务 {} 不存在", id)
        }
        ActionOutcome::NotPerformed(Rejection::InFlight(kind)) => {
            log_warning!("任务正在{}，请稍候", kind)
        }
        ActionOutcome::NotPerformed(Rejection::StatusNotAllowed { action, status }) => {
            log_warning!("当前状态 {} 不能{}", status, action)
        }
        ActionOutcome::NotPerformed(Rejection::AddInFlight(novel_id)) => {
            log_warning!("小说 {} 正在添加中", novel_id)
        }
    }
}

/// 令牌失效时提示重新登录
fn check_auth<T>(result: Result<T, ActionError>) -> anyhow::Result<T> {
    result.map_err(|e| {
        if e.api_error().is_auth_error() {
            log_warning!("登录状态已失效，请重新执行 noveldl login");
        }
        e.into()
    })
}

fn print_tasks(tasks: &[DownloadTask]) {
    PrettyLogger::title("下载任务");
    if tasks.is_empty() {
        log_info!("暂无任务");
    }
    for task in tasks {
        PrettyLogger::task_row(task);
    }
    PrettyLogger::separator();
}

/// watch 模式下的进度条集合
struct TaskBars {
    multi: MultiProgress,
    style: ProgressStyle,
    bars: HashMap<i64, ProgressBar>,
}

impl TaskBars {
    fn new() -> anyhow::Result<Self> {
        let style = ProgressStyle::with_template(
            "{prefix:>5} [{bar:30.cyan/blue}] {pos:>3}% {msg}",
        )?
        .progress_chars("#>-");
        Ok(Self {
            multi: MultiProgress::new(),
            style,
            bars: HashMap::new(),
        })
    }

    fn sync(&mut self, tasks: &[DownloadTask]) {
        for task in tasks {
            let bar = self.bars.entry(task.id).or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new(100));
                bar.set_style(self.style.clone());
                bar.set_prefix(task.id.to_string());
                bar
            });
            bar.set_position((task.display_progress() * 100.0).round() as u64);
            bar.set_message(format!(
                "{} {}",
                PrettyLogger::status(task.status),
                task.title()
            ));
        }

        // 快照中已经不存在的任务
        let live: Vec<i64> = tasks.iter().map(|t| t.id).collect();
        self.bars.retain(|id, bar| {
            let keep = live.contains(id);
            if !keep {
                bar.finish_and_clear();
            }
            keep
        });
    }

    fn println(&self, message: String) {
        let _ = self.multi.println(message);
    }
}

async fn watch(
    config: &ClientConfig,
    session: Arc<SessionStore>,
    actions: &TaskActions,
) -> anyhow::Result<()> {
    let repository = Arc::clone(actions.repository());
    match actions.refresh().await {
        Ok(_) => {}
        Err(e) if e.api_error().is_auth_error() => return check_auth(Err(e)),
        // 拉取失败仍然继续，等待推送
        Err(e) => log_error!("{}", e),
    }

    let connector = Arc::new(WsConnector::new(config.realtime_url.clone()));
    let channel = Arc::new(ChannelClient::new(connector, config.handshake_timeout));
    let supervisor = Arc::new(ConnectionSupervisor::new(
        channel,
        session,
        Arc::clone(&repository),
        config.retry,
        config.probe_interval,
    ));
    let handle = Arc::clone(&supervisor).spawn();

    let mut bars = TaskBars::new()?;
    bars.sync(&repository.visible());

    let mut changes = repository.subscribe();
    let mut connection = supervisor.subscribe();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            change = changes.recv() => match change {
                Ok(change) => {
                    debug!("仓库变更: {:?}", change);
                    bars.sync(&repository.visible());
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("跳过 {} 条变更通知", skipped);
                    bars.sync(&repository.visible());
                }
                Err(RecvError::Closed) => break,
            },
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *connection.borrow_and_update();
                let text = match state {
                    ConnectionState::Connected => "实时通道已连接".green(),
                    ConnectionState::Connecting => "正在连接实时通道...".yellow(),
                    ConnectionState::Disconnected => "实时通道未连接".red(),
                };
                bars.println(text.to_string());
            }
        }
    }

    supervisor.shutdown();
    handle.await?;
    info!("已退出实时查看");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 解析命令行参数
    let args = cli::Cli::parse();

    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    let mut config = ClientConfig::new(&args.api)?.with_session_file(&args.session_file);
    config.probe_interval = Duration::from_secs(args.probe_interval.max(1));
    config.retry.max_attempts = args.max_attempts.max(1);

    // 命令行给出的令牌只保存在内存中
    let session = Arc::new(match &args.token {
        Some(_) => SessionStore::in_memory(),
        None => SessionStore::persistent(&config.session_file),
    });
    let client = NovelClient::new(&config, Arc::clone(&session))?;
    let auth = AuthManager::new(client.clone());

    match &args.token {
        Some(token) => session.set_token(TokenInfo::new(token.clone(), None)).await?,
        None => {
            if !matches!(args.command, cli::Command::Login { .. }) {
                auth.restore().await?;
            }
        }
    }

    let repository = Arc::new(TaskRepository::new());
    let actions = TaskActions::new(Arc::new(client), repository);

    match args.command {
        cli::Command::Login { username, password } => {
            auth.login(&username, &password).await?;
            log_success!("登录成功，令牌已保存到 {}", config.session_file.display());
            return Ok(());
        }
        cli::Command::Logout => {
            auth.logout().await?;
            log_success!("已登出");
            return Ok(());
        }
        _ if !session.is_authenticated() => bail!("尚未登录，请先执行 noveldl login"),
        cli::Command::Whoami => {
            let user = auth.current_user().await?;
            log_info!("当前用户: {} (id {})", user.username, user.id);
            if let Some(info) = session.token_info() {
                log_info!(
                    "令牌保存于 {}",
                    info.saved_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        cli::Command::List => {
            check_auth(actions.refresh().await)?;
            print_tasks(&actions.repository().visible());
        }
        cli::Command::Add { novel_id } => {
            let outcome = check_auth(actions.add_novel(&novel_id).await)?;
            report(&outcome);
        }
        cli::Command::Terminate { id } => {
            check_auth(actions.refresh().await)?;
            report(&check_auth(actions.terminate(id).await)?);
        }
        cli::Command::Delete { id } => {
            check_auth(actions.refresh().await)?;
            report(&check_auth(actions.delete(id).await)?);
        }
        cli::Command::Redownload { id } => {
            check_auth(actions.refresh().await)?;
            report(&check_auth(actions.redownload(id).await)?);
        }
        cli::Command::Status { job_id } => {
            let status = check_auth(actions.job_status(&job_id).await)?;
            log_info!(
                "{}: {} ({})",
                status.task_id,
                status.status,
                status.result.as_deref().unwrap_or("-")
            );
            if let Some(meta) = &status.meta {
                println!("{}", serde_json::to_string_pretty(meta)?);
            }
            if let Some(traceback) = &status.traceback {
                println!("{}", traceback.bright_black());
            }
        }
        cli::Command::Watch => watch(&config, Arc::clone(&session), &actions).await?,
    }

    Ok(())
}
