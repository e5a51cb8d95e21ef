use crate::plan::ExecutionPlan;
use crate::{BackupError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Outcome of one engine invocation. A non-zero exit code is not fatal on
/// its own; the classifier's verdict over the captured log is
/// authoritative, the exit code is a secondary diagnostic signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Verbatim process exit code; None when the engine died on a signal
    pub exit_code: Option<i32>,
    pub log_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn exited_zero(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs plans through the backup engine binary under the resolved home.
pub struct Executor {
    engine_binary: PathBuf,
    home_dir: PathBuf,
    timeout: Option<Duration>,
}

impl Executor {
    pub fn new(engine_binary: PathBuf, home_dir: PathBuf, timeout_seconds: Option<u64>) -> Self {
        Self {
            engine_binary,
            home_dir,
            timeout: timeout_seconds.map(Duration::from_secs),
        }
    }

    /// Feed the plan to the engine on stdin and capture stdout and stderr
    /// interleaved into a single log file, preserving output order for
    /// forensic reconstruction.
    ///
    /// Blocks for the full duration of the engine run unless the
    /// configured timeout expires, in which case the subprocess is killed
    /// and the result is marked timed out. An interrupt or terminate
    /// signal also kills the subprocess; the partial log and plan are left
    /// in place since the interruption itself is diagnostic information.
    pub async fn run(
        &self,
        plan: &ExecutionPlan,
        instance: &str,
        log_path: &Path,
    ) -> Result<ExecutionResult> {
        let started_at = Utc::now();

        let log_file = std::fs::File::create(log_path)?;
        let log_for_stderr = log_file.try_clone()?;

        debug!(
            "Launching {} for {} (log: {})",
            self.engine_binary.display(),
            instance,
            log_path.display()
        );

        let mut child = Command::new(&self.engine_binary)
            .arg("target")
            .arg("/")
            .env("ORACLE_HOME", &self.home_dir)
            .env("ORACLE_SID", instance)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_for_stderr))
            .spawn()?;

        // The engine reads commands until EOF, so the plan goes in whole
        // and stdin is closed before waiting.
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(plan.render().as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let timeout_expiry = async {
            match self.timeout {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending().await,
            }
        };

        // The child must not stay borrowed by the wait future once a
        // branch wins, so the kill happens after the select resolves.
        let outcome = tokio::select! {
            status = child.wait() => WaitOutcome::Exited(status?),
            _ = timeout_expiry => WaitOutcome::TimedOut,
            _ = cancellation_signal() => WaitOutcome::Interrupted,
        };

        match outcome {
            WaitOutcome::Exited(status) => {
                let finished_at = Utc::now();
                info!(
                    "Engine run for {} finished with status {:?} after {}s",
                    instance,
                    status.code(),
                    (finished_at - started_at).num_seconds()
                );
                Ok(ExecutionResult {
                    exit_code: status.code(),
                    log_path: log_path.to_path_buf(),
                    started_at,
                    finished_at,
                    timed_out: false,
                })
            }
            WaitOutcome::TimedOut => {
                let seconds = self.timeout.map(|d| d.as_secs()).unwrap_or_default();
                warn!(
                    "Engine run for {} exceeded {}s, killing subprocess",
                    instance, seconds
                );
                child.start_kill()?;
                let _ = child.wait().await;
                Ok(ExecutionResult {
                    exit_code: None,
                    log_path: log_path.to_path_buf(),
                    started_at,
                    finished_at: Utc::now(),
                    timed_out: true,
                })
            }
            WaitOutcome::Interrupted => {
                warn!("Run for {} interrupted, terminating subprocess", instance);
                child.start_kill()?;
                let _ = child.wait().await;
                Err(BackupError::Interrupted)
            }
        }
    }
}

enum WaitOutcome {
    Exited(std::process::ExitStatus),
    TimedOut,
    Interrupted,
}

/// Resolves when the process receives an interrupt or terminate signal
async fn cancellation_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!("Cannot install SIGTERM handler: {}", e);
                std::future::pending().await
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
