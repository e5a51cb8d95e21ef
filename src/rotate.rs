use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// What one rotation sweep did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RotationSummary {
    pub compressed: usize,
    pub deleted: usize,
}

/// Age out historical run artifacts: compress logs past the first horizon,
/// delete already-compressed artifacts past the second. Purely time-based,
/// no content inspection. Every failure is a warning; housekeeping never
/// fails the job.
pub fn rotate(log_dir: &Path, compress_after_days: u32, delete_after_days: u32) -> RotationSummary {
    let mut summary = RotationSummary::default();

    // Snapshot the listing first: compression adds new entries to the
    // directory mid-sweep, and those must not age out in the same pass.
    let entries: Vec<_> = match fs::read_dir(log_dir) {
        Ok(entries) => entries.flatten().collect(),
        Err(e) => {
            warn!("Cannot scan log directory {}: {}", log_dir.display(), e);
            return summary;
        }
    };

    for entry in entries {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match extension {
            "zst" => {
                if is_older_than_days(&path, delete_after_days) {
                    match fs::remove_file(&path) {
                        Ok(()) => {
                            debug!("Deleted aged artifact {}", path.display());
                            summary.deleted += 1;
                        }
                        Err(e) => warn!("Cannot delete {}: {}", path.display(), e),
                    }
                }
            }
            "log" | "err" => {
                if is_older_than_days(&path, compress_after_days) {
                    match compress_file(&path) {
                        Ok(()) => {
                            debug!("Compressed aged log {}", path.display());
                            summary.compressed += 1;
                        }
                        Err(e) => warn!("Cannot compress {}: {}", path.display(), e),
                    }
                }
            }
            _ => {}
        }
    }

    summary
}

fn is_older_than_days(path: &Path, days: u32) -> bool {
    let modified = match path.metadata().and_then(|meta| meta.modified()) {
        Ok(modified) => modified,
        Err(e) => {
            warn!("Cannot read mtime of {}: {}", path.display(), e);
            return false;
        }
    };

    let age_floor = Duration::from_secs(u64::from(days) * 24 * 60 * 60);
    match SystemTime::now().duration_since(modified) {
        Ok(age) => age >= age_floor,
        // Clock skew put the file in the future; leave it alone
        Err(_) => false,
    }
}

fn compress_file(path: &Path) -> std::io::Result<()> {
    let mut target = path.as_os_str().to_owned();
    target.push(".zst");

    let input = fs::File::open(path)?;
    let output = fs::File::create(Path::new(&target))?;
    zstd::stream::copy_encode(input, output, 0)?;

    fs::remove_file(path)
}
