pub mod builder;

pub use builder::PlanBuilder;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One unit of backup work, created by the caller at invocation time.
///
/// The kind is fixed for the lifetime of the job; a different kind means a
/// different job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupJob {
    pub target_instance: String,
    pub kind: BackupKind,
    pub compression: bool,
    pub parallelism: u32,
    pub max_piece_size: String,
    pub requested_at: DateTime<Utc>,
}

impl BackupJob {
    /// Calendar-day partition label used in output paths and plan tags
    pub fn date_tag(&self) -> String {
        self.requested_at.format("%Y-%m-%d").to_string()
    }

    /// Timestamp used to name the run's log, error, and plan artifacts
    pub fn timestamp_tag(&self) -> String {
        self.requested_at.format("%Y%m%d_%H%M%S").to_string()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackupKind {
    Full,
    Incremental,
    LogOnly,
}

impl BackupKind {
    pub fn label(&self) -> &'static str {
        match self {
            BackupKind::Full => "full",
            BackupKind::Incremental => "incremental",
            BackupKind::LogOnly => "logonly",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single engine command. Plans are assembled from these records and
/// rendered to text only at the executor boundary, so tests can assert on
/// structure instead of matching strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Directive {
    AllocateChannel {
        id: String,
        max_piece_size: String,
    },
    BackupDatabase {
        /// None for a full backup, Some(level) for an incremental one
        incremental_level: Option<u8>,
        compressed: bool,
        tag: String,
        format: String,
    },
    BackupArchivelog {
        compressed: bool,
        tag: String,
        format: String,
    },
    BackupControlfile {
        format: String,
    },
    BackupSpfile {
        format: String,
    },
    Sql {
        statement: String,
    },
    ReleaseChannel {
        id: String,
    },
    ConfigureRetention {
        window_days: u32,
    },
    CrosscheckBackup,
    ReportObsolete,
    DeleteObsolete,
}

impl Directive {
    fn render(&self) -> String {
        match self {
            Directive::AllocateChannel { id, max_piece_size } => format!(
                "allocate channel {id} device type disk maxpiecesize {max_piece_size};"
            ),
            Directive::BackupDatabase {
                incremental_level,
                compressed,
                tag,
                format,
            } => {
                let prefix = backup_prefix(*compressed);
                match incremental_level {
                    Some(level) => format!(
                        "{prefix} incremental level {level} database tag '{tag}' format '{format}';"
                    ),
                    None => format!("{prefix} database tag '{tag}' format '{format}';"),
                }
            }
            Directive::BackupArchivelog {
                compressed,
                tag,
                format,
            } => {
                let prefix = backup_prefix(*compressed);
                format!(
                    "{prefix} archivelog all not backed up 1 times tag '{tag}' format '{format}';"
                )
            }
            Directive::BackupControlfile { format } => {
                format!("backup current controlfile format '{format}';")
            }
            Directive::BackupSpfile { format } => format!("backup spfile format '{format}';"),
            Directive::Sql { statement } => format!("sql '{statement}';"),
            Directive::ReleaseChannel { id } => format!("release channel {id};"),
            Directive::ConfigureRetention { window_days } => format!(
                "configure retention policy to recovery window of {window_days} days;"
            ),
            Directive::CrosscheckBackup => "crosscheck backup;".to_string(),
            Directive::ReportObsolete => "report obsolete;".to_string(),
            Directive::DeleteObsolete => "delete noprompt obsolete;".to_string(),
        }
    }
}

fn backup_prefix(compressed: bool) -> &'static str {
    if compressed {
        "backup as compressed backupset"
    } else {
        "backup"
    }
}

/// Deterministic command sequence for one engine invocation. Rendering the
/// same plan always produces byte-identical text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub directives: Vec<Directive>,
}

impl ExecutionPlan {
    pub fn new(directives: Vec<Directive>) -> Self {
        Self { directives }
    }

    /// Render the plan as an engine command script. Channel-allocating
    /// plans need a run block; maintenance plans are top-level commands.
    pub fn render(&self) -> String {
        let needs_run_block = self
            .directives
            .iter()
            .any(|d| matches!(d, Directive::AllocateChannel { .. }));

        let mut text = String::new();
        if needs_run_block {
            text.push_str("run {\n");
            for directive in &self.directives {
                text.push_str("    ");
                text.push_str(&directive.render());
                text.push('\n');
            }
            text.push_str("}\n");
        } else {
            for directive in &self.directives {
                text.push_str(&directive.render());
                text.push('\n');
            }
        }
        text.push_str("exit;\n");
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_channel_rendering() {
        let directive = Directive::AllocateChannel {
            id: "ch1".to_string(),
            max_piece_size: "100G".to_string(),
        };
        assert_eq!(
            directive.render(),
            "allocate channel ch1 device type disk maxpiecesize 100G;"
        );
    }

    #[test]
    fn test_compressed_qualifier_wraps_backup_directives() {
        let plain = Directive::BackupDatabase {
            incremental_level: None,
            compressed: false,
            tag: "FULL_2025_11_06".to_string(),
            format: "/b/db_%d_%T_%U.bkp".to_string(),
        };
        assert!(plain.render().starts_with("backup database"));

        let compressed = Directive::BackupDatabase {
            incremental_level: None,
            compressed: true,
            tag: "FULL_2025_11_06".to_string(),
            format: "/b/db_%d_%T_%U.bkp".to_string(),
        };
        assert!(compressed
            .render()
            .starts_with("backup as compressed backupset database"));
    }

    #[test]
    fn test_incremental_level_rendering() {
        let directive = Directive::BackupDatabase {
            incremental_level: Some(1),
            compressed: false,
            tag: "INCR_2025_11_06".to_string(),
            format: "/b/db_%d_%T_%U.bkp".to_string(),
        };
        assert!(directive.render().contains("incremental level 1 database"));
    }

    #[test]
    fn test_maintenance_plan_has_no_run_block() {
        let plan = ExecutionPlan::new(vec![
            Directive::ConfigureRetention { window_days: 14 },
            Directive::CrosscheckBackup,
            Directive::ReportObsolete,
            Directive::DeleteObsolete,
        ]);
        let text = plan.render();
        assert!(!text.contains("run {"));
        assert!(text.contains("configure retention policy to recovery window of 14 days;"));
        assert!(text.ends_with("exit;\n"));
    }

    #[test]
    fn test_channel_plan_is_wrapped_in_run_block() {
        let plan = ExecutionPlan::new(vec![
            Directive::AllocateChannel {
                id: "ch1".to_string(),
                max_piece_size: "1G".to_string(),
            },
            Directive::ReleaseChannel {
                id: "ch1".to_string(),
            },
        ]);
        let text = plan.render();
        assert!(text.starts_with("run {\n"));
        assert!(text.contains("}\nexit;\n"));
    }
}
