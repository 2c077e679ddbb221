pub mod actions;
pub mod error;
pub mod models;
pub mod repository;

pub use actions::{ActionKind, ActionOutcome, Rejection, TaskActions};
pub use error::{ActionError, RepositoryError};
pub use models::{DownloadTask, NovelSnapshot, TaskStatus, TaskUpdate};
pub use repository::{RepositoryChange, TaskRepository, UpsertOutcome};
