use crate::classify::{classify, ErrorRecord};
use crate::executor::{ExecutionResult, Executor};
use crate::plan::{Directive, ExecutionPlan};
use crate::Result;
use std::path::Path;
use tracing::info;

/// Enforces the recovery-window policy after a clean primary backup.
///
/// Deletion of backup content only ever happens here, and only through the
/// engine's own obsolete-deletion directive; the core never removes backup
/// data with direct file operations.
pub struct RetentionEnforcer {
    recovery_window_days: u32,
}

impl RetentionEnforcer {
    pub fn new(recovery_window_days: u32) -> Self {
        Self {
            recovery_window_days,
        }
    }

    /// Maintenance plan: pin the retention policy, reconcile the catalog
    /// with what is actually on disk, report what fell outside the window,
    /// then delete it without further confirmation.
    pub fn build_plan(&self) -> ExecutionPlan {
        ExecutionPlan::new(vec![
            Directive::ConfigureRetention {
                window_days: self.recovery_window_days,
            },
            Directive::CrosscheckBackup,
            Directive::ReportObsolete,
            Directive::DeleteObsolete,
        ])
    }

    /// Run the maintenance plan and classify its log the same way the
    /// primary run is classified. The caller reports retention findings
    /// under a distinct terminal status from backup findings.
    pub async fn enforce(
        &self,
        executor: &Executor,
        instance: &str,
        log_path: &Path,
    ) -> Result<(ExecutionResult, Vec<ErrorRecord>)> {
        info!(
            "Enforcing {}-day recovery window for {}",
            self.recovery_window_days, instance
        );

        let plan = self.build_plan();
        let result = executor.run(&plan, instance, log_path).await?;
        let records = if result.timed_out {
            Vec::new()
        } else {
            classify(log_path)?
        };

        Ok((result, records))
    }
}
