use chrono::{DateTime, Utc};

/// Job state as shown to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Waiting,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Waiting => "Waiting",
        }
    }
}

/// One row of the scheduler's task list.
#[derive(Debug, Clone)]
pub struct ScheduleInfo {
    pub id: String,
    pub name: String,
    /// Who provides the job: an addon name, or `[System]` for built-ins.
    pub provider: String,
    pub status: JobStatus,
    pub next_run: Option<DateTime<Utc>>,
}
