use crate::error::AppError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Expands tilde (~) in a path string to the user's home directory.
pub fn expand_tilde_path_buf(path_str: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path_str).as_ref())
}

/// Resolves the directory a command should run in.
///
/// `None` or a blank request falls back to `default_dir`. Relative requests are
/// joined onto `default_dir`. The result must be an existing directory.
pub fn resolve_working_dir(requested: Option<&str>, default_dir: &Path) -> Result<PathBuf, AppError> {
    let requested = match requested.map(str::trim).filter(|s| !s.is_empty()) {
        Some(r) => r,
        None => return Ok(default_dir.to_path_buf()),
    };

    let expanded = expand_tilde_path_buf(requested);
    let joined = if expanded.is_absolute() {
        expanded
    } else {
        default_dir.join(expanded)
    };

    let resolved = dunce::canonicalize(&joined)
        .map_err(|e| AppError::InvalidPath(format!("{}: {}", joined.display(), e)))?;
    debug!(requested = %requested, resolved = %resolved.display(), "Resolved working directory");

    if !resolved.is_dir() {
        return Err(AppError::InvalidPath(format!(
            "Not a directory: {}",
            resolved.display()
        )));
    }
    Ok(resolved)
}
