use crate::classify::{classify, write_error_report};
use crate::config::Config;
use crate::environment::resolve_home;
use crate::executor::Executor;
use crate::lock::Lock;
use crate::plan::{BackupJob, BackupKind, PlanBuilder};
use crate::preflight::PreflightValidator;
use crate::retention::RetentionEnforcer;
use crate::rotate::rotate;
use crate::{BackupError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Terminal report for one run: status, per-phase error counts, engine
/// exit codes, and every artifact path, so a run is auditable without
/// re-parsing its logs.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub instance: String,
    pub kind: BackupKind,
    pub primary_exit: Option<i32>,
    pub primary_errors: usize,
    pub retention_exit: Option<i32>,
    pub retention_errors: usize,
    pub log_path: PathBuf,
    pub err_path: PathBuf,
    pub retention_log_path: PathBuf,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "status=success instance={} kind={} backup_errors={} retention_errors={} \
             engine_exit={} retention_exit={} log={} err={} retention_log={}",
            self.instance,
            self.kind,
            self.primary_errors,
            self.retention_errors,
            exit_label(self.primary_exit),
            exit_label(self.retention_exit),
            self.log_path.display(),
            self.err_path.display(),
            self.retention_log_path.display(),
        )
    }
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}

/// Drives one job through the full stage sequence: environment, lock,
/// preflight, plan, execution, classification, retention, log rotation.
/// Each stage failure short-circuits with its own terminal status; the
/// lock is freed on every path once acquired.
pub struct Orchestrator {
    config: Config,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Render the plan a real run would execute, without taking the lock,
    /// probing the instance, or invoking the engine.
    pub fn dry_run(&self, job: &BackupJob) -> Result<String> {
        resolve_home(&self.config.home_lookup_table_path, &job.target_instance)?;

        let backup_dir = self.config.backup_directory(&job.target_instance);
        let plan = PlanBuilder::build(job, &backup_dir, &job.date_tag())?;
        Ok(plan.render())
    }

    pub async fn run(&self, job: &BackupJob, keep_plan: bool) -> Result<RunSummary> {
        let instance = job.target_instance.as_str();

        let home = resolve_home(&self.config.home_lookup_table_path, instance)?;
        let engine_binary = self.engine_binary(&home);
        let query_binary = self.query_binary(&home);
        if !engine_binary.is_file() {
            warn!("Backup engine binary {} not found", engine_binary.display());
            return Err(BackupError::EnvironmentNotFound {
                instance: instance.to_string(),
            });
        }
        if !query_binary.is_file() {
            warn!("Query client binary {} not found", query_binary.display());
            return Err(BackupError::EnvironmentNotFound {
                instance: instance.to_string(),
            });
        }

        // Held for the rest of the run; Drop releases it on every exit
        // path, signals and panics included.
        let _lock = Lock::acquire(
            &self.config.lock_path(instance, job.kind.label()),
            instance,
        )?;

        let validator = PreflightValidator::new(query_binary, home.clone());
        if let Err(e) = validator.validate(instance).await {
            error!("Preflight failed for {}: {}", instance, e);
            return Err(e);
        }

        let backup_dir = self.config.backup_directory(instance);
        let date_tag = job.date_tag();
        let plan = PlanBuilder::build(job, &backup_dir, &date_tag)?;

        let log_dir = self.config.log_directory();
        let timestamp = job.timestamp_tag();
        let log_path = log_dir.join(format!("{instance}_{}_{timestamp}.log", job.kind));
        let err_path = log_dir.join(format!("{instance}_{}_{timestamp}.err", job.kind));
        let retention_log_path = log_dir.join(format!("{instance}_retention_{timestamp}.log"));

        std::fs::create_dir_all(&log_dir)?;
        std::fs::create_dir_all(&self.config.plan_directory())?;
        std::fs::create_dir_all(backup_dir.join(&date_tag))?;

        let plan_path = self
            .config
            .plan_directory()
            .join(format!("{instance}_{}_{timestamp}.rcv", job.kind));
        std::fs::write(&plan_path, plan.render())?;

        let executor = Executor::new(engine_binary, home, self.config.timeout_seconds);

        info!(
            "Starting {} backup of {} with {} channel(s)",
            job.kind, instance, job.parallelism
        );
        let primary = executor.run(&plan, instance, &log_path).await?;

        if primary.timed_out {
            let seconds = self.config.timeout_seconds.unwrap_or_default();
            error!(
                "status=timeout instance={} kind={} log={}",
                instance,
                job.kind,
                log_path.display()
            );
            remove_plan_file(&plan_path, keep_plan);
            return Err(BackupError::Timeout { seconds });
        }

        let records = classify(&log_path)?;
        write_error_report(&err_path, &records)?;

        if !records.is_empty() {
            error!(
                "status=backup-failed instance={} kind={} backup_errors={} engine_exit={} log={} err={}",
                instance,
                job.kind,
                records.len(),
                exit_label(primary.exit_code),
                log_path.display(),
                err_path.display()
            );
            remove_plan_file(&plan_path, keep_plan);
            return Err(BackupError::ExecutionFailed {
                count: records.len(),
                err_path,
            });
        }

        if !primary.exited_zero() {
            // Classification is authoritative; the exit code is surfaced
            // as a secondary signal only.
            warn!(
                "Engine exited with {} but the log classified clean, treating as success",
                exit_label(primary.exit_code)
            );
        }

        let enforcer = RetentionEnforcer::new(self.config.recovery_window_days);
        let (retention, retention_records) = enforcer
            .enforce(&executor, instance, &retention_log_path)
            .await?;

        remove_plan_file(&plan_path, keep_plan);

        if retention.timed_out {
            let seconds = self.config.timeout_seconds.unwrap_or_default();
            error!(
                "status=retention-failed instance={} reason=timeout retention_log={}",
                instance,
                retention_log_path.display()
            );
            return Err(BackupError::RetentionFailed {
                reason: format!("timed out after {seconds} seconds"),
            });
        }
        if !retention_records.is_empty() {
            error!(
                "status=retention-failed instance={} retention_errors={} retention_log={}",
                instance,
                retention_records.len(),
                retention_log_path.display()
            );
            return Err(BackupError::RetentionFailed {
                reason: format!(
                    "{} classified error(s), see {}",
                    retention_records.len(),
                    retention_log_path.display()
                ),
            });
        }

        let rotation = rotate(
            &log_dir,
            self.config.compress_logs_after_days,
            self.config.delete_logs_after_days,
        );
        if rotation.compressed > 0 || rotation.deleted > 0 {
            info!(
                "Log rotation: {} compressed, {} deleted",
                rotation.compressed, rotation.deleted
            );
        }

        let summary = RunSummary {
            instance: instance.to_string(),
            kind: job.kind,
            primary_exit: primary.exit_code,
            primary_errors: 0,
            retention_exit: retention.exit_code,
            retention_errors: 0,
            log_path,
            err_path,
            retention_log_path,
        };
        info!("{}", summary);
        Ok(summary)
    }

    fn engine_binary(&self, home: &Path) -> PathBuf {
        self.config
            .backup_engine_binary
            .clone()
            .unwrap_or_else(|| home.join("bin").join("rman"))
    }

    fn query_binary(&self, home: &Path) -> PathBuf {
        self.config
            .query_client_binary
            .clone()
            .unwrap_or_else(|| home.join("bin").join("sqlplus"))
    }
}

fn remove_plan_file(plan_path: &Path, keep_plan: bool) {
    if keep_plan {
        info!("Keeping plan file {}", plan_path.display());
        return;
    }
    if let Err(e) = std::fs::remove_file(plan_path) {
        warn!("Cannot remove plan file {}: {}", plan_path.display(), e);
    }
}
