pub mod auth;
pub mod common;
pub mod config;
pub mod realtime;
pub mod supervisor;
pub mod tasks;

pub use config::ClientConfig;
pub use realtime::ChannelClient;
pub use supervisor::{ConnectionState, ConnectionSupervisor};
pub use tasks::{DownloadTask, TaskActions, TaskRepository, TaskStatus};
