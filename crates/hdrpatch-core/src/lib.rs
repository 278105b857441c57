//! # hdrpatch-core
//!
//! Idempotent, marker-anchored text insertion for vendored source files.
//!
//! A [`Patch`] names three things: a *marker* substring that picks the
//! insertion point (the first line containing it), a *block* of lines to
//! insert before that line, and a *sentinel* substring whose presence
//! anywhere in the file means the block is already there.
//!
//! ## Applying
//!
//! ```text
//! before                        after
//! ------                        -----
//! A                             A
//! #elif defined(_MSC_VER)       #elif defined(X)      <- block
//! B                             #define Y 1           <- block
//!                               <blank separator>
//!                               #elif defined(_MSC_VER)
//!                               B
//! ```
//!
//! Running [`apply`] again on the result returns
//! [`Outcome::AlreadyApplied`] and writes nothing. Writes go through a
//! temporary file renamed over the target, so a failed write never leaves a
//! truncated file behind.
//!
//! ## Concurrency
//!
//! Two processes patching the same file at once can race between the
//! sentinel check and the write. Set [`ApplyOptions::lock`] to serialize
//! them on an advisory lock.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

mod apply;
mod patch;

pub use apply::{apply, apply_with, plan, ApplyOptions, Outcome, Report};
pub use patch::{MarkerMissing, Patch, Plan};

/// Errors that can occur while planning or applying a patch
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("marker {marker:?} not found in {}", path.display())]
    MarkerNotFound { path: PathBuf, marker: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid patch: {0}")]
    InvalidPatch(String),
}

pub type Result<T, E = PatchError> = std::result::Result<T, E>;
