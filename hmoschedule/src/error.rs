use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{0}': {1}")]
    InvalidCron(String, String),
    #[error("Cron expression '{0}' never fires")]
    NeverFires(String),
    #[error("No tokio runtime available to run job {0}")]
    NoRuntime(String),
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
