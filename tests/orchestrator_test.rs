//! End-to-end orchestration tests
//!
//! These tests drive full runs against stub collaborator binaries: a fake
//! engine and query client written as shell scripts inside a throwaway
//! home directory, and a fake instance control process created by copying
//! the sleep binary under the control process's conventional name.

#![cfg(unix)]

use chrono::Utc;
use rmanctl::plan::{BackupJob, BackupKind, PlanBuilder};
use rmanctl::{BackupError, Config, Orchestrator};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use tempfile::TempDir;

const CLEAN_ENGINE: &str = "#!/bin/sh\ncat\necho 'Finished backup'\nexit 0\n";

const PRIMARY_QUERY: &str = "#!/bin/sh\ncat > /dev/null\necho 'PRIMARY'\nexit 0\n";

/// Engine stub that fails only the retention phase, recognized by its
/// obsolete-deletion directive.
const RETENTION_FAILING_ENGINE: &str = "#!/bin/sh
input=$(cat)
echo \"$input\"
case \"$input\" in
  *'delete noprompt obsolete'*) echo 'RMAN-06207: WARNING: 2 objects could not be deleted' ;;
esac
exit 0
";

fn write_script(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Throwaway environment: base directory, lookup table, and a stub home
struct Fixture {
    _dir: TempDir,
    config: Config,
    home: PathBuf,
}

impl Fixture {
    fn new(instance: &str, engine_body: &str, query_body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();

        let home = dir.path().join("dbhome");
        std::fs::create_dir_all(home.join("bin")).unwrap();
        write_script(&home.join("bin").join("rman"), engine_body);
        write_script(&home.join("bin").join("sqlplus"), query_body);

        let oratab = dir.path().join("oratab");
        std::fs::write(&oratab, format!("{instance}:{}:N\n", home.display())).unwrap();

        let config = Config {
            base_directory: dir.path().join("base"),
            home_lookup_table_path: oratab,
            channels: 2,
            ..Config::default()
        };

        Self {
            _dir: dir,
            config,
            home,
        }
    }

    fn job(&self, instance: &str, kind: BackupKind) -> BackupJob {
        BackupJob {
            target_instance: instance.to_string(),
            kind,
            compression: true,
            parallelism: self.config.channels,
            max_piece_size: self.config.max_piece_size.clone(),
            requested_at: Utc::now(),
        }
    }
}

/// Runs a copy of sleep named like the instance's control process, so the
/// process-table scan sees the instance as alive.
struct FakePmon {
    child: Child,
}

impl FakePmon {
    fn spawn(dir: &Path, instance: &str) -> Self {
        let sleep_binary = ["/bin/sleep", "/usr/bin/sleep"]
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
            .expect("no sleep binary found");

        let pmon_path = dir.join(format!("ora_pmon_{instance}"));
        std::fs::copy(sleep_binary, &pmon_path).unwrap();
        std::fs::set_permissions(&pmon_path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let child = Command::new(&pmon_path).arg("60").spawn().unwrap();
        Self { child }
    }
}

impl Drop for FakePmon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[tokio::test]
async fn test_successful_run_produces_all_artifacts() {
    let fixture = Fixture::new("PRIM1", CLEAN_ENGINE, PRIMARY_QUERY);
    let _pmon = FakePmon::spawn(fixture.home.as_path(), "PRIM1");

    let job = fixture.job("PRIM1", BackupKind::Full);
    let orchestrator = Orchestrator::new(fixture.config.clone());
    let summary = orchestrator.run(&job, false).await.unwrap();

    assert_eq!(summary.primary_exit, Some(0));
    assert_eq!(summary.primary_errors, 0);
    assert_eq!(summary.retention_errors, 0);

    assert!(summary.log_path.exists());
    assert!(summary.retention_log_path.exists());

    // Clean run: the classified-error companion exists and is empty
    assert!(summary.err_path.exists());
    assert_eq!(std::fs::read_to_string(&summary.err_path).unwrap(), "");

    // The captured log holds the rendered plan the stub echoed back
    let log = std::fs::read_to_string(&summary.log_path).unwrap();
    assert!(log.contains("backup as compressed backupset database"));

    // Lock and plan file are gone after the run
    assert!(!fixture.config.lock_path("PRIM1", "full").exists());
    assert_eq!(
        std::fs::read_dir(fixture.config.plan_directory())
            .unwrap()
            .count(),
        0
    );
}

#[tokio::test]
async fn test_classified_errors_fail_the_run() {
    let failing_engine =
        "#!/bin/sh\ncat > /dev/null\necho 'RMAN-03009: failure of backup command on ch1 channel'\nexit 1\n";
    let fixture = Fixture::new("FAIL1", failing_engine, PRIMARY_QUERY);
    let _pmon = FakePmon::spawn(fixture.home.as_path(), "FAIL1");

    let job = fixture.job("FAIL1", BackupKind::Full);
    let orchestrator = Orchestrator::new(fixture.config.clone());
    let result = orchestrator.run(&job, false).await;

    match &result {
        Err(BackupError::ExecutionFailed { count, err_path }) => {
            assert_eq!(*count, 1);
            let report = std::fs::read_to_string(err_path).unwrap();
            assert!(report.contains("RMAN-03009"));
            assert!(report.contains("remedy:"));
        }
        other => panic!("expected ExecutionFailed, got {other:?}"),
    }
    assert_eq!(result.unwrap_err().exit_code(), 5);

    // Bookkeeping still ran: the lock is free again
    assert!(!fixture.config.lock_path("FAIL1", "full").exists());
}

#[tokio::test]
async fn test_nonzero_exit_with_clean_log_is_success() {
    // Warnings-only engine: non-zero exit, nothing classifiable
    let warning_engine = "#!/bin/sh\ncat > /dev/null\necho 'completed with warnings'\nexit 1\n";
    let fixture = Fixture::new("EXIT1", warning_engine, PRIMARY_QUERY);
    let _pmon = FakePmon::spawn(fixture.home.as_path(), "EXIT1");

    let job = fixture.job("EXIT1", BackupKind::Incremental);
    let orchestrator = Orchestrator::new(fixture.config.clone());
    let summary = orchestrator.run(&job, false).await.unwrap();

    // Classification is authoritative; the exit code is surfaced as a
    // secondary signal in the summary.
    assert_eq!(summary.primary_exit, Some(1));
    assert_eq!(summary.primary_errors, 0);
}

#[tokio::test]
async fn test_retention_failure_is_a_distinct_status() {
    let fixture = Fixture::new("RET1", RETENTION_FAILING_ENGINE, PRIMARY_QUERY);
    let _pmon = FakePmon::spawn(fixture.home.as_path(), "RET1");

    let job = fixture.job("RET1", BackupKind::Full);
    let orchestrator = Orchestrator::new(fixture.config.clone());
    let result = orchestrator.run(&job, false).await;

    match &result {
        Err(BackupError::RetentionFailed { reason }) => {
            assert!(reason.contains("1 classified error(s)"));
        }
        other => panic!("expected RetentionFailed, got {other:?}"),
    }
    assert_eq!(result.unwrap_err().exit_code(), 6);
}

#[tokio::test]
async fn test_standby_role_is_rejected() {
    let standby_query = "#!/bin/sh\ncat > /dev/null\necho 'PHYSICAL STANDBY'\nexit 0\n";
    let fixture = Fixture::new("STBY1", CLEAN_ENGINE, standby_query);
    let _pmon = FakePmon::spawn(fixture.home.as_path(), "STBY1");

    let job = fixture.job("STBY1", BackupKind::Full);
    let orchestrator = Orchestrator::new(fixture.config.clone());
    let result = orchestrator.run(&job, false).await;

    match &result {
        Err(BackupError::RoleNotPrimary { role, .. }) => {
            assert_eq!(role, "PHYSICAL STANDBY");
        }
        other => panic!("expected RoleNotPrimary, got {other:?}"),
    }
    assert_eq!(result.unwrap_err().exit_code(), 4);

    // Validation failures release the held lock before exiting
    assert!(!fixture.config.lock_path("STBY1", "full").exists());
}

#[tokio::test]
async fn test_empty_role_response_fails_closed() {
    let silent_query = "#!/bin/sh\ncat > /dev/null\nexit 0\n";
    let fixture = Fixture::new("MUTE1", CLEAN_ENGINE, silent_query);
    let _pmon = FakePmon::spawn(fixture.home.as_path(), "MUTE1");

    let job = fixture.job("MUTE1", BackupKind::Full);
    let orchestrator = Orchestrator::new(fixture.config.clone());
    let result = orchestrator.run(&job, false).await;

    assert!(matches!(
        result,
        Err(BackupError::RoleIndeterminate { .. })
    ));
}

#[tokio::test]
async fn test_stopped_instance_is_rejected() {
    // No fake control process: the instance looks down
    let fixture = Fixture::new("DOWN1", CLEAN_ENGINE, PRIMARY_QUERY);

    let job = fixture.job("DOWN1", BackupKind::Full);
    let orchestrator = Orchestrator::new(fixture.config.clone());
    let result = orchestrator.run(&job, false).await;

    match &result {
        Err(BackupError::InstanceNotRunning { instance }) => assert_eq!(instance, "DOWN1"),
        other => panic!("expected InstanceNotRunning, got {other:?}"),
    }
    assert_eq!(result.unwrap_err().exit_code(), 3);
}

#[tokio::test]
async fn test_held_lock_aborts_without_retry() {
    let fixture = Fixture::new("BUSY1", CLEAN_ENGINE, PRIMARY_QUERY);

    // Another live run: a lock file naming this very process
    let lock_path = fixture.config.lock_path("BUSY1", "full");
    std::fs::create_dir_all(lock_path.parent().unwrap()).unwrap();
    std::fs::write(&lock_path, std::process::id().to_string()).unwrap();

    let job = fixture.job("BUSY1", BackupKind::Full);
    let orchestrator = Orchestrator::new(fixture.config.clone());
    let result = orchestrator.run(&job, false).await;

    match &result {
        Err(BackupError::LockBusy { owner_pid, .. }) => {
            assert_eq!(*owner_pid, std::process::id());
        }
        other => panic!("expected LockBusy, got {other:?}"),
    }
    assert_eq!(result.unwrap_err().exit_code(), 7);

    // The foreign lock is left untouched
    assert!(lock_path.exists());
}

#[tokio::test]
async fn test_unknown_instance_is_an_environment_error() {
    let fixture = Fixture::new("KNOWN", CLEAN_ENGINE, PRIMARY_QUERY);

    let job = fixture.job("GHOST", BackupKind::Full);
    let orchestrator = Orchestrator::new(fixture.config.clone());
    let result = orchestrator.run(&job, false).await;

    assert!(matches!(
        result,
        Err(BackupError::EnvironmentNotFound { .. })
    ));
}

#[tokio::test]
async fn test_dry_run_matches_real_plan_and_leaves_no_state() {
    let fixture = Fixture::new("DRY1", CLEAN_ENGINE, PRIMARY_QUERY);

    let job = fixture.job("DRY1", BackupKind::Full);
    let orchestrator = Orchestrator::new(fixture.config.clone());

    let dry_text = orchestrator.dry_run(&job).unwrap();
    let built = PlanBuilder::build(
        &job,
        &fixture.config.backup_directory("DRY1"),
        &job.date_tag(),
    )
    .unwrap();
    assert_eq!(dry_text, built.render());

    // Repeated dry runs are byte-identical and never touch lock state
    assert_eq!(dry_text, orchestrator.dry_run(&job).unwrap());
    assert!(!fixture.config.lock_directory().exists());
}

#[tokio::test]
async fn test_keep_plan_retains_the_plan_file() {
    let fixture = Fixture::new("KEEP1", CLEAN_ENGINE, PRIMARY_QUERY);
    let _pmon = FakePmon::spawn(fixture.home.as_path(), "KEEP1");

    let job = fixture.job("KEEP1", BackupKind::LogOnly);
    let orchestrator = Orchestrator::new(fixture.config.clone());
    orchestrator.run(&job, true).await.unwrap();

    let plans: Vec<_> = std::fs::read_dir(fixture.config.plan_directory())
        .unwrap()
        .flatten()
        .collect();
    assert_eq!(plans.len(), 1);

    let plan_text = std::fs::read_to_string(plans[0].path()).unwrap();
    assert!(plan_text.contains("archivelog all not backed up 1 times"));
}
