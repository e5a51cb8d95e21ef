use crate::{BackupError, Result};
use std::path::PathBuf;
use std::process::Stdio;
use sysinfo::System;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

const ROLE_QUERY: &str = "\
set heading off feedback off pagesize 0 verify off echo off
select database_role from v$database;
exit;
";

const PRIMARY_ROLE: &str = "PRIMARY";

/// Confirms the target instance is running and holds the primary role
/// before any backup work starts. Both checks fail closed: a role the
/// validator cannot positively confirm is a failure, never a pass.
pub struct PreflightValidator {
    query_client: PathBuf,
    home_dir: PathBuf,
}

impl PreflightValidator {
    pub fn new(query_client: PathBuf, home_dir: PathBuf) -> Self {
        Self {
            query_client,
            home_dir,
        }
    }

    /// Liveness first, then role; short-circuits on the first failure.
    pub async fn validate(&self, instance: &str) -> Result<()> {
        if !instance_process_alive(instance) {
            return Err(BackupError::InstanceNotRunning {
                instance: instance.to_string(),
            });
        }
        debug!("Control process for {} found", instance);

        let role = self.query_role(instance).await?;
        if role != PRIMARY_ROLE {
            return Err(BackupError::RoleNotPrimary {
                instance: instance.to_string(),
                role,
            });
        }

        info!("Preflight passed for {}: running, role {}", instance, PRIMARY_ROLE);
        Ok(())
    }

    async fn query_role(&self, instance: &str) -> Result<String> {
        let mut child = Command::new(&self.query_client)
            .arg("-S")
            .arg("-L")
            .arg("/ as sysdba")
            .env("ORACLE_HOME", &self.home_dir)
            .env("ORACLE_SID", instance)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(ROLE_QUERY.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            warn!(
                "Role query for {} exited with {:?}",
                instance,
                output.status.code()
            );
            return Err(BackupError::RoleIndeterminate {
                instance: instance.to_string(),
                detail: format!("query client exited with {:?}", output.status.code()),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_role_response(&stdout).ok_or_else(|| BackupError::RoleIndeterminate {
            instance: instance.to_string(),
            detail: "empty or unparseable role response".to_string(),
        })
    }
}

/// First meaningful line of the query output, trimmed. Lines carrying an
/// error code mean the query itself failed, so no role can be confirmed.
fn parse_role_response(stdout: &str) -> Option<String> {
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.contains("ORA-") || line.contains("SP2-") {
            return None;
        }
        return Some(line.to_string());
    }
    None
}

/// The instance's control process follows a fixed naming convention; its
/// absence from the process table means the instance is down.
fn instance_process_alive(instance: &str) -> bool {
    let mut sys = System::new();
    sys.refresh_processes();

    sys.processes()
        .values()
        .any(|process| process_name_matches(process.name(), instance))
}

/// Process names from the kernel are truncated, so compare against the
/// truncated convention rather than the full string.
fn process_name_matches(name: &str, instance: &str) -> bool {
    let pattern = format!("ora_pmon_{instance}");
    let truncated_len = pattern.len().min(15);
    name.starts_with(&pattern[..truncated_len])
}
