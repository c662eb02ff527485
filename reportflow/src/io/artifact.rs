//! Writing the final report to disk.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, instrument};

/// Atomically write `contents` to `path` (temp file + rename), creating parent dirs.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Persist the final report, ensuring a trailing newline.
#[instrument(skip_all, fields(path = %path.display(), bytes = report.len()))]
pub fn write_report(path: &Path, report: &str) -> Result<()> {
    let mut buf = report.to_string();
    if !buf.ends_with('\n') {
        buf.push('\n');
    }
    write_atomic(path, &buf)?;
    info!("final report written");
    Ok(())
}
