use crate::{BackupError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Resolve an instance's installation home from the oratab-style lookup
/// table. Fails closed: a missing entry, an unreadable table, or an entry
/// whose directory does not exist on disk all reject the instance.
pub fn resolve_home(table_path: &Path, instance: &str) -> Result<PathBuf> {
    let contents =
        std::fs::read_to_string(table_path).map_err(|e| {
            warn!(
                "Cannot read home lookup table {}: {}",
                table_path.display(),
                e
            );
            BackupError::EnvironmentNotFound {
                instance: instance.to_string(),
            }
        })?;

    let home = lookup_in_table(&contents, instance).ok_or_else(|| {
        BackupError::EnvironmentNotFound {
            instance: instance.to_string(),
        }
    })?;

    if !home.is_dir() {
        warn!(
            "Lookup table maps {} to {}, which does not exist",
            instance,
            home.display()
        );
        return Err(BackupError::EnvironmentNotFound {
            instance: instance.to_string(),
        });
    }

    debug!("Resolved home for {}: {}", instance, home.display());
    Ok(home)
}

/// First non-comment `name:homeDir:...` line matching the instance wins;
/// later duplicates are ignored.
fn lookup_in_table(contents: &str, instance: &str) -> Option<PathBuf> {
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.split(':');
        let name = fields.next()?.trim();
        if name != instance {
            continue;
        }

        let home = fields.next()?.trim();
        if home.is_empty() {
            continue;
        }
        return Some(PathBuf::from(home));
    }
    None
}
