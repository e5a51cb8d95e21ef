use crate::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

/// One classified finding from a run log. Records are immutable once
/// produced; re-running the classifier over the same log is idempotent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorRecord {
    /// Normalized code token, e.g. "RMAN-03009"
    pub code: String,
    pub occurrence_count: usize,
    /// The line on which the code first appeared
    pub first_context_line: String,
    pub severity: Severity,
    pub description: String,
    pub remedy: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Critical,
    Warning,
    Unknown,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

struct CatalogEntry {
    code: &'static str,
    severity: Severity,
    description: &'static str,
    remedy: &'static str,
}

/// Local error catalog for the two code families the engine and its
/// client emit. Codes outside this table still produce a record with the
/// generic fallback remedy; the classifier never drops an observed code.
const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        code: "RMAN-03002",
        severity: Severity::Critical,
        description: "failure of a top-level command",
        remedy: "inspect the messages directly above this code for the underlying cause",
    },
    CatalogEntry {
        code: "RMAN-03009",
        severity: Severity::Critical,
        description: "failure of a command on an allocated channel",
        remedy: "check the named channel's section of the log for the accompanying ORA- error",
    },
    CatalogEntry {
        code: "RMAN-06059",
        severity: Severity::Critical,
        description: "expected archived log not found",
        remedy: "crosscheck the archived logs and validate the archive destination before rerunning",
    },
    CatalogEntry {
        code: "RMAN-06207",
        severity: Severity::Warning,
        description: "some obsolete objects could not be deleted",
        remedy: "run a crosscheck, then delete expired objects and repeat the obsolete deletion",
    },
    CatalogEntry {
        code: "RMAN-08137",
        severity: Severity::Warning,
        description: "archived log kept because a standby still needs it",
        remedy: "clears on its own once the standby applies the log; verify standby lag if persistent",
    },
    CatalogEntry {
        code: "ORA-00257",
        severity: Severity::Critical,
        description: "archiver stuck, log destination full",
        remedy: "free space in the archive destination or raise its quota, then resume the instance",
    },
    CatalogEntry {
        code: "ORA-01031",
        severity: Severity::Critical,
        description: "insufficient privileges",
        remedy: "run under an account with sysdba or sysbackup on the target instance",
    },
    CatalogEntry {
        code: "ORA-03113",
        severity: Severity::Critical,
        description: "end-of-file on communication channel",
        remedy: "the instance terminated mid-run; read the alert log before retrying",
    },
    CatalogEntry {
        code: "ORA-19502",
        severity: Severity::Critical,
        description: "write error on a backup piece",
        remedy: "check free space and write permissions on the backup destination",
    },
    CatalogEntry {
        code: "ORA-19504",
        severity: Severity::Critical,
        description: "failed to create an output file",
        remedy: "verify the day directory exists and is writable by the instance owner",
    },
    CatalogEntry {
        code: "ORA-19511",
        severity: Severity::Critical,
        description: "media management layer error",
        remedy: "consult the media manager's own log; the text after this code comes from the vendor library",
    },
    CatalogEntry {
        code: "ORA-27037",
        severity: Severity::Critical,
        description: "unable to obtain file status",
        remedy: "an input file is missing or unreadable; check paths and mount state",
    },
];

const UNMAPPED_REMEDY: &str =
    "code is not in the local catalog; consult the vendor error reference";

fn code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b(?:ORA|RMAN)-\d{5}\b").unwrap())
}

fn catalog_lookup(code: &str) -> Option<&'static CatalogEntry> {
    CATALOG.iter().find(|entry| entry.code == code)
}

/// Scan a run log for engine and client error codes.
///
/// Returns one record per distinct code, ordered by first appearance, with
/// exact occurrence counts. An empty list means the run was clean. The log
/// itself is never modified, so classification can be re-run for audits.
pub fn classify(log_path: &Path) -> Result<Vec<ErrorRecord>> {
    let bytes = std::fs::read(log_path)?;
    let text = String::from_utf8_lossy(&bytes);
    let records = classify_text(&text);
    debug!(
        "Classified {}: {} distinct code(s)",
        log_path.display(),
        records.len()
    );
    Ok(records)
}

/// Pure classification over already-captured log content
pub fn classify_text(text: &str) -> Vec<ErrorRecord> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut first_lines: HashMap<String, String> = HashMap::new();

    for line in text.lines() {
        for found in code_pattern().find_iter(line) {
            let code = found.as_str().to_string();
            if !counts.contains_key(&code) {
                order.push(code.clone());
                first_lines.insert(code.clone(), line.trim().to_string());
            }
            *counts.entry(code).or_insert(0) += 1;
        }
    }

    order
        .into_iter()
        .map(|code| {
            let occurrence_count = counts[&code];
            let first_context_line = first_lines.remove(&code).unwrap_or_default();
            match catalog_lookup(&code) {
                Some(entry) => ErrorRecord {
                    code,
                    occurrence_count,
                    first_context_line,
                    severity: entry.severity,
                    description: entry.description.to_string(),
                    remedy: entry.remedy.to_string(),
                },
                None => ErrorRecord {
                    code,
                    occurrence_count,
                    first_context_line,
                    severity: Severity::Unknown,
                    description: "unmapped error code".to_string(),
                    remedy: UNMAPPED_REMEDY.to_string(),
                },
            }
        })
        .collect()
}

/// Write the classified findings as the run's companion error artifact.
/// An empty record list produces an empty file, which readers treat as a
/// clean run.
pub fn write_error_report(err_path: &Path, records: &[ErrorRecord]) -> Result<()> {
    let mut report = String::new();
    for record in records {
        report.push_str(&format!(
            "{} ({} occurrence{}) [{}] {}\n    first: {}\n    remedy: {}\n",
            record.code,
            record.occurrence_count,
            if record.occurrence_count == 1 { "" } else { "s" },
            record.severity,
            record.description,
            record.first_context_line,
            record.remedy,
        ));
    }
    std::fs::write(err_path, report)?;
    Ok(())
}
