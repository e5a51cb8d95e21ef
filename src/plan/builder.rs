use super::{BackupJob, BackupKind, Directive, ExecutionPlan};
use crate::{BackupError, Result};
use std::path::Path;

/// Builds the deterministic command plan for a job. The same job, backup
/// directory, and day tag always produce the same plan.
pub struct PlanBuilder;

impl PlanBuilder {
    /// Assemble the directive sequence for one backup run.
    ///
    /// Output paths partition by the day tag; uniqueness within the day
    /// directory comes from the engine's %U piece token, so repeated
    /// same-day runs share a directory without colliding.
    pub fn build(job: &BackupJob, backup_dir: &Path, date_tag: &str) -> Result<ExecutionPlan> {
        if job.parallelism < 1 {
            return Err(BackupError::InvalidParallelism {
                value: job.parallelism,
            });
        }

        let day_dir = backup_dir.join(date_tag);
        let tag = plan_tag(job.kind, date_tag);

        let mut directives = Vec::new();

        for channel in 1..=job.parallelism {
            directives.push(Directive::AllocateChannel {
                id: format!("ch{channel}"),
                max_piece_size: job.max_piece_size.clone(),
            });
        }

        match job.kind {
            BackupKind::Full | BackupKind::Incremental => {
                let level = match job.kind {
                    BackupKind::Incremental => Some(1),
                    _ => None,
                };
                directives.push(Directive::BackupDatabase {
                    incremental_level: level,
                    compressed: job.compression,
                    tag: tag.clone(),
                    format: piece_format(&day_dir, "db"),
                });
                directives.push(Directive::BackupControlfile {
                    format: piece_format(&day_dir, "ctl"),
                });
                directives.push(Directive::BackupSpfile {
                    format: piece_format(&day_dir, "spf"),
                });
                directives.push(Directive::Sql {
                    statement: "alter system archive log current".to_string(),
                });
            }
            BackupKind::LogOnly => {
                directives.push(Directive::Sql {
                    statement: "alter system archive log current".to_string(),
                });
                directives.push(Directive::BackupArchivelog {
                    compressed: job.compression,
                    tag: tag.clone(),
                    format: piece_format(&day_dir, "arch"),
                });
            }
        }

        for channel in 1..=job.parallelism {
            directives.push(Directive::ReleaseChannel {
                id: format!("ch{channel}"),
            });
        }

        Ok(ExecutionPlan::new(directives))
    }
}

/// Engine tags allow only alphanumerics and underscores
fn plan_tag(kind: BackupKind, date_tag: &str) -> String {
    format!(
        "{}_{}",
        kind.label().to_uppercase(),
        date_tag.replace('-', "_")
    )
}

fn piece_format(day_dir: &Path, prefix: &str) -> String {
    format!("{}/{}_%d_%T_%U.bkp", day_dir.display(), prefix)
}
