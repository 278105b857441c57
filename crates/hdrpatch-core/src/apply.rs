//! Filesystem side of patch application: existence check, read, plan,
//! optional advisory lock, and atomic write-back.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tempfile::Builder;
use tracing::{debug, info, warn};

use crate::patch::{Patch, Plan};
use crate::{PatchError, Result};

/// Result of a successful [`apply`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// File rewritten; block now starts at this 1-based line.
    Applied { line: usize },
    /// Sentinel found at this 1-based line; nothing written.
    AlreadyApplied { line: usize },
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Applied { line } => write!(f, "applied at line {}", line),
            Outcome::AlreadyApplied { line } => {
                write!(f, "already applied (sentinel at line {})", line)
            }
        }
    }
}

/// Knobs for [`apply_with`].
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Hold an exclusive advisory lock on a sidecar file across the
    /// read-check-write sequence.
    pub lock: bool,
}

/// Detailed result of [`apply_with`].
#[derive(Debug, Clone)]
pub struct Report {
    /// Resolved target (symlinks followed).
    pub path: PathBuf,
    pub outcome: Outcome,
    /// BLAKE3 hex digest of the content as read.
    pub before: String,
    /// BLAKE3 hex digest of the content left on disk.
    pub after: String,
}

/// Apply `patch` to the file at `path`.
///
/// Re-running against an already patched file is a no-op returning
/// [`Outcome::AlreadyApplied`]. On any error the file is left byte-for-byte
/// unchanged.
pub fn apply<P: AsRef<Path>>(path: P, patch: &Patch) -> Result<Outcome> {
    apply_with(path, patch, &ApplyOptions::default()).map(|report| report.outcome)
}

impl Patch {
    /// Method form of [`apply`].
    pub fn apply<P: AsRef<Path>>(&self, path: P) -> Result<Outcome> {
        apply(path, self)
    }
}

/// Like [`apply`], with options and content digests.
pub fn apply_with<P: AsRef<Path>>(
    path: P,
    patch: &Patch,
    options: &ApplyOptions,
) -> Result<Report> {
    let target = resolve_target(path.as_ref())?;

    let _guard = if options.lock {
        Some(TargetLock::acquire(&target)?)
    } else {
        None
    };

    let (text, permissions) = read_target(&target)?;
    let before = digest(text.as_bytes());

    match plan_for(&target, &text, patch)? {
        Plan::AlreadyApplied { index } => {
            info!(path = %target.display(), line = index + 1, "Patch already present, skipping");
            Ok(Report {
                path: target,
                outcome: Outcome::AlreadyApplied { line: index + 1 },
                after: before.clone(),
                before,
            })
        }
        Plan::Insert { index } => {
            let patched = patch.splice(&text, index);
            write_atomic(&target, patched.as_bytes(), permissions).map_err(|source| {
                PatchError::Io {
                    path: target.clone(),
                    source,
                }
            })?;
            info!(
                path = %target.display(),
                line = index + 1,
                lines = patch.inserted_line_count(),
                "Patch applied"
            );
            Ok(Report {
                after: digest(patched.as_bytes()),
                path: target,
                outcome: Outcome::Applied { line: index + 1 },
                before,
            })
        }
    }
}

/// Report what [`apply`] would do without writing anything.
pub fn plan<P: AsRef<Path>>(path: P, patch: &Patch) -> Result<Plan> {
    let target = resolve_target(path.as_ref())?;
    let (text, _) = read_target(&target)?;
    plan_for(&target, &text, patch)
}

fn plan_for(target: &Path, text: &str, patch: &Patch) -> Result<Plan> {
    patch
        .plan_text(text)
        .map_err(|_| PatchError::MarkerNotFound {
            path: target.to_path_buf(),
            marker: patch.marker().to_string(),
        })
}

/// Follow symlinks so the rename replaces the real file, not the link.
fn resolve_target(path: &Path) -> Result<PathBuf> {
    let not_found = || PatchError::NotFound {
        path: path.to_path_buf(),
    };

    let resolved = fs::canonicalize(path).map_err(|e| {
        debug!(path = %path.display(), error = %e, "Cannot resolve target");
        not_found()
    })?;
    let metadata = fs::metadata(&resolved).map_err(|_| not_found())?;
    if !metadata.is_file() {
        return Err(not_found());
    }
    Ok(resolved)
}

fn read_target(target: &Path) -> Result<(String, fs::Permissions)> {
    let io_err = |source| PatchError::Io {
        path: target.to_path_buf(),
        source,
    };
    let permissions = fs::metadata(target).map_err(io_err)?.permissions();
    let text = fs::read_to_string(target).map_err(io_err)?;
    debug!(path = %target.display(), bytes = text.len(), "Read target");
    Ok((text, permissions))
}

/// Replace `target` with `data` via temp file + rename in the same
/// directory. The original stays intact until the rename.
fn write_atomic(target: &Path, data: &[u8], permissions: fs::Permissions) -> io::Result<()> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = Builder::new().prefix(".hdrpatch").tempfile_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.as_file().set_permissions(permissions)?;
    temp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

fn digest(data: &[u8]) -> String {
    hex::encode(blake3::hash(data).as_bytes())
}

/// Exclusive advisory lock on `.<name>.hdrpatch.lock` beside the target.
///
/// The target itself is not locked because the atomic rename swaps its
/// inode out from under any waiter.
struct TargetLock {
    file: File,
    path: PathBuf,
}

impl TargetLock {
    fn acquire(target: &Path) -> Result<Self> {
        let path = lock_path(target);
        let io_err = |source| PatchError::Io {
            path: path.clone(),
            source,
        };
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(io_err)?;
        debug!(lock = %path.display(), "Waiting for patch lock");
        FileExt::lock_exclusive(&file).map_err(io_err)?;
        Ok(Self { file, path })
    }
}

impl Drop for TargetLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(lock = %self.path.display(), error = %e, "Failed to release patch lock");
        }
    }
}

fn lock_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.hdrpatch.lock", name))
}
