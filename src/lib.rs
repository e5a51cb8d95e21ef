pub mod classify;
pub mod config;
pub mod environment;
pub mod executor;
pub mod lock;
pub mod orchestrator;
pub mod plan;
pub mod preflight;
pub mod retention;
pub mod rotate;

pub use config::Config;
pub use orchestrator::{Orchestrator, RunSummary};

// Re-export the job and plan types for convenience
pub use plan::{BackupJob, BackupKind, Directive, ExecutionPlan, PlanBuilder};

pub use classify::{classify, ErrorRecord, Severity};
pub use environment::resolve_home;
pub use executor::{ExecutionResult, Executor};
pub use lock::Lock;
pub use preflight::PreflightValidator;
pub use retention::RetentionEnforcer;
pub use rotate::rotate;

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no usable home directory entry for instance {instance}")]
    EnvironmentNotFound { instance: String },

    #[error("instance {instance} is not running")]
    InstanceNotRunning { instance: String },

    #[error("instance {instance} has role {role}, refusing to back up a non-primary")]
    RoleNotPrimary { instance: String, role: String },

    #[error("could not determine the role of instance {instance}: {detail}")]
    RoleIndeterminate { instance: String, detail: String },

    #[error("invalid parallelism degree {value}, must be a positive integer")]
    InvalidParallelism { value: u32 },

    #[error("another backup of {instance} is already running (pid {owner_pid})")]
    LockBusy { instance: String, owner_pid: u32 },

    #[error("backup run reported {count} classified error(s), see {}", err_path.display())]
    ExecutionFailed { count: usize, err_path: PathBuf },

    #[error("backup succeeded but retention maintenance failed: {reason}")]
    RetentionFailed { reason: String },

    #[error("operation timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("run interrupted by signal, subprocess terminated")]
    Interrupted,
}

impl BackupError {
    /// Process exit code for a terminal failure, matching the documented
    /// CLI contract (0 = success is handled by the caller).
    pub fn exit_code(&self) -> i32 {
        match self {
            BackupError::Io(_) => 1,
            BackupError::EnvironmentNotFound { .. } => 2,
            BackupError::InstanceNotRunning { .. } => 3,
            BackupError::RoleNotPrimary { .. } | BackupError::RoleIndeterminate { .. } => 4,
            BackupError::InvalidParallelism { .. } => 1,
            BackupError::ExecutionFailed { .. }
            | BackupError::Timeout { .. }
            | BackupError::Interrupted => 5,
            BackupError::RetentionFailed { .. } => 6,
            BackupError::LockBusy { .. } => 7,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
