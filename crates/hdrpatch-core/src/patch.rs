//! In-memory patch model and the pure text operations behind it.
//!
//! Nothing here touches the filesystem; [`crate::apply`] wires these
//! functions to a target file.

use std::fmt;

use crate::{PatchError, Result};

/// One marker-anchored insertion.
///
/// The block is inserted immediately before the first line containing
/// `marker`, followed by one blank line. A line containing `sentinel`
/// anywhere in the file means the insertion is already there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    marker: String,
    sentinel: String,
    block: Vec<String>,
}

/// Where a patch stands against a given text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Block goes in at this 0-based line index (the first marker line).
    Insert { index: usize },
    /// Sentinel first seen at this 0-based line index.
    AlreadyApplied { index: usize },
}

impl Patch {
    /// Build a patch, rejecting definitions that could never apply cleanly.
    ///
    /// Marker and sentinel must be non-empty single-line strings, and the
    /// marker must not contain the sentinel (the marker line would read as
    /// already patched). The block must have at least one line, no line may
    /// embed a newline, and some line must carry the sentinel so a rerun
    /// sees the earlier insertion.
    pub fn new<M, S, I, L>(marker: M, sentinel: S, block: I) -> Result<Self>
    where
        M: Into<String>,
        S: Into<String>,
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        let marker = marker.into();
        let sentinel = sentinel.into();
        let block: Vec<String> = block.into_iter().map(Into::into).collect();

        if marker.is_empty() {
            return Err(PatchError::InvalidPatch("marker is empty".into()));
        }
        if sentinel.is_empty() {
            return Err(PatchError::InvalidPatch("sentinel is empty".into()));
        }
        if marker.contains('\n') || sentinel.contains('\n') {
            return Err(PatchError::InvalidPatch(
                "marker and sentinel must be single lines".into(),
            ));
        }
        if marker.contains(&sentinel) {
            return Err(PatchError::InvalidPatch(
                "marker must not contain the sentinel".into(),
            ));
        }
        if block.is_empty() {
            return Err(PatchError::InvalidPatch("block is empty".into()));
        }
        if block.iter().any(|line| line.contains('\n')) {
            return Err(PatchError::InvalidPatch(
                "block lines must not contain newlines".into(),
            ));
        }
        if !block.iter().any(|line| line.contains(&sentinel)) {
            return Err(PatchError::InvalidPatch(
                "block does not contain the sentinel".into(),
            ));
        }

        Ok(Self {
            marker,
            sentinel,
            block,
        })
    }

    /// Build a patch from a multi-line block string.
    ///
    /// A trailing newline on `block` is ignored; `"a\nb\n"` and `"a\nb"`
    /// describe the same two-line block.
    pub fn from_block_text(
        marker: impl Into<String>,
        sentinel: impl Into<String>,
        block: &str,
    ) -> Result<Self> {
        Self::new(marker, sentinel, block.lines())
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    pub fn block(&self) -> &[String] {
        &self.block
    }

    /// Number of lines the patch adds, separator included.
    pub fn inserted_line_count(&self) -> usize {
        self.block.len() + 1
    }

    /// Decide what applying this patch to `text` would do.
    ///
    /// The sentinel scan covers the whole text and runs first, so a patched
    /// file is reported as such even when its marker has since vanished.
    pub fn plan_text(&self, text: &str) -> Result<Plan, MarkerMissing> {
        if let Some(index) = find_line(text, &self.sentinel) {
            return Ok(Plan::AlreadyApplied { index });
        }
        match find_line(text, &self.marker) {
            Some(index) => Ok(Plan::Insert { index }),
            None => Err(MarkerMissing),
        }
    }

    /// Return `text` with the block spliced in before line `index`.
    ///
    /// Inserted lines reuse the terminator of the line they precede, so CRLF
    /// content stays CRLF. An `index` past the last line appends.
    pub fn splice(&self, text: &str, index: usize) -> String {
        let mut out = String::with_capacity(text.len() + self.rendered_len(2));
        let mut inserted = false;

        for (i, line) in text.split_inclusive('\n').enumerate() {
            if i == index {
                self.render_into(&mut out, line_ending(line));
                inserted = true;
            }
            out.push_str(line);
        }

        if !inserted {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            self.render_into(&mut out, "\n");
        }
        out
    }

    fn render_into(&self, out: &mut String, eol: &str) {
        for line in &self.block {
            out.push_str(line);
            out.push_str(eol);
        }
        out.push_str(eol);
    }

    fn rendered_len(&self, eol_len: usize) -> usize {
        self.block.iter().map(|l| l.len() + eol_len).sum::<usize>() + eol_len
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plan::Insert { index } => write!(f, "pending (insert before line {})", index + 1),
            Plan::AlreadyApplied { index } => {
                write!(f, "applied (sentinel at line {})", index + 1)
            }
        }
    }
}

/// Marker search came up empty. Lifted into [`PatchError::MarkerNotFound`]
/// once a path is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerMissing;

/// 0-based index of the first line containing `needle`.
fn find_line(text: &str, needle: &str) -> Option<usize> {
    text.split_inclusive('\n')
        .position(|line| line.contains(needle))
}

fn line_ending(line: &str) -> &'static str {
    if line.ends_with("\r\n") {
        "\r\n"
    } else {
        "\n"
    }
}
