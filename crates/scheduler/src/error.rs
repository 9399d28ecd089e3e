use thiserror::Error;

/// Errors raised while registering or driving scheduled jobs.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("unknown job: {0}")]
    UnknownJob(String),
}
