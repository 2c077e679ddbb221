use colored::*;

use crate::tasks::models::{DownloadTask, TaskStatus};

/// 命令行输出工具
pub struct PrettyLogger;

impl PrettyLogger {
    /// 显示成功消息
    pub fn success(message: impl AsRef<str>) {
        println!("{} {}", "✓".green().bold(), message.as_ref());
    }

    /// 显示信息消息
    pub fn info(message: impl AsRef<str>) {
        println!("{} {}", "ℹ".blue().bold(), message.as_ref());
    }

    /// 显示警告消息
    pub fn warning(message: impl AsRef<str>) {
        println!("{} {}", "⚠".yellow().bold(), message.as_ref());
    }

    /// 显示错误消息
    pub fn error(message: impl AsRef<str>) {
        eprintln!("{} {}", "✗".red().bold(), message.as_ref());
    }

    pub fn status(status: TaskStatus) -> ColoredString {
        match status {
            TaskStatus::Pending => status.as_str().bright_black(),
            TaskStatus::Downloading => status.as_str().blue(),
            TaskStatus::Processing => status.as_str().cyan(),
            TaskStatus::Completed => status.as_str().green(),
            TaskStatus::Failed => status.as_str().red(),
            TaskStatus::Terminated => status.as_str().yellow(),
        }
    }

    /// 一行任务摘要
    pub fn task_row(task: &DownloadTask) {
        let bar_width = 20;
        let progress = task.display_progress();
        let filled = (progress * bar_width as f64).round() as usize;
        let bar = format!(
            "[{}{}] {:>5.1}%",
            "█".repeat(filled).green(),
            "░".repeat(bar_width - filled.min(bar_width)).bright_black(),
            progress * 100.0
        );
        let title = if task.deleted {
            task.title().strikethrough()
        } else {
            task.title().bold()
        };
        println!(
            "{:>5}  {:<12} {}  {}  {}",
            task.id,
            Self::status(task.status),
            bar,
            title,
            task.message.as_deref().unwrap_or_default().bright_black()
        );
    }

    /// 显示分割线
    pub fn separator() {
        println!("{}", "─".repeat(50).bright_black());
    }

    /// 显示标题
    pub fn title(text: impl AsRef<str>) {
        let text = text.as_ref();
        let width = text.chars().count().min(48);
        let padding = (48 - width) / 2;
        let line = "─".repeat(padding);
        println!(
            "{} {} {}",
            line.bright_black(),
            text.bold(),
            "─".repeat(48 - padding - width).bright_black()
        );
    }
}

/// 便捷宏用于漂亮的日志输出
#[macro_export]
macro_rules! log_success {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::success(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::info(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::warning(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::error(format!($($arg)*))
    };
}
