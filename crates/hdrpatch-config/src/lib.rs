//! # hdrpatch-config
//!
//! Patch definitions: the built-in Intel LLVM TLS preset and project-local
//! `hdrpatch.toml` files.
//!
//! ```toml
//! [[patch]]
//! name = "intel-llvm-tls"
//! target = "subprojects/abseil-cpp-20240722.0/absl/base/internal/per_thread_tls.h"
//! marker = "#elif defined(_MSC_VER)"
//! sentinel = "__INTEL_LLVM_COMPILER"
//! block = """
//! #elif defined(__INTEL_LLVM_COMPILER)
//! #define ABSL_PER_THREAD_TLS_KEYWORD __thread
//! #define ABSL_PER_THREAD_TLS 1
//! """
//! ```

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use hdrpatch_core::{Patch, PatchError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Name of the project-local patch file looked up by [`PatchSet::discover`].
pub const CONFIG_FILE_NAME: &str = "hdrpatch.toml";

/// Abseil release the built-in preset targets.
pub const ABSEIL_SUBPROJECT: &str = "subprojects/abseil-cpp-20240722.0";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("duplicate patch name: {0}")]
    DuplicateName(String),

    #[error("patch {name}: {source}")]
    Invalid {
        name: String,
        #[source]
        source: PatchError,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// One named insertion against one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchDefinition {
    pub name: String,
    /// Relative to the project root unless absolute.
    pub target: PathBuf,
    pub marker: String,
    pub sentinel: String,
    /// Lines to insert; a trailing newline is ignored.
    pub block: String,
}

impl PatchDefinition {
    /// Teach Abseil's `per_thread_tls.h` about the Intel oneAPI DPC++/C++
    /// compiler, which does not get `ABSL_HAVE_TLS` but supports `__thread`.
    pub fn intel_llvm_tls() -> Self {
        Self {
            name: "intel-llvm-tls".to_string(),
            target: Path::new(ABSEIL_SUBPROJECT).join("absl/base/internal/per_thread_tls.h"),
            marker: "#elif defined(_MSC_VER)".to_string(),
            sentinel: "__INTEL_LLVM_COMPILER".to_string(),
            block: "#elif defined(__INTEL_LLVM_COMPILER)\n\
                    #define ABSL_PER_THREAD_TLS_KEYWORD __thread\n\
                    #define ABSL_PER_THREAD_TLS 1\n"
                .to_string(),
        }
    }

    pub fn resolve_target(&self, root: &Path) -> PathBuf {
        if self.target.is_absolute() {
            self.target.clone()
        } else {
            root.join(&self.target)
        }
    }

    pub fn to_patch(&self) -> Result<Patch> {
        Patch::from_block_text(&*self.marker, &*self.sentinel, &self.block).map_err(|source| {
            ConfigError::Invalid {
                name: self.name.clone(),
                source,
            }
        })
    }
}

/// Ordered collection of patch definitions with unique names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSet {
    #[serde(rename = "patch", default)]
    patches: Vec<PatchDefinition>,
}

impl PatchSet {
    /// The set used when a project carries no `hdrpatch.toml`.
    pub fn builtin() -> Self {
        Self {
            patches: vec![PatchDefinition::intel_llvm_tls()],
        }
    }

    /// Build from definitions, enforcing unique names and valid patches.
    pub fn new(patches: Vec<PatchDefinition>) -> Result<Self> {
        let mut seen = HashSet::new();
        for def in &patches {
            if !seen.insert(def.name.as_str()) {
                return Err(ConfigError::DuplicateName(def.name.clone()));
            }
            def.to_patch()?;
        }
        Ok(Self { patches })
    }

    pub fn from_toml_str(source: &str, origin: &Path) -> Result<Self> {
        let raw: PatchSet = toml::from_str(source).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        Self::new(raw.patches)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let set = Self::from_toml_str(&source, path)?;
        info!(path = %path.display(), patches = set.len(), "Loaded patch definitions");
        Ok(set)
    }

    /// Load `<root>/hdrpatch.toml`, falling back to [`PatchSet::builtin`].
    pub fn discover(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE_NAME);
        if path.is_file() {
            Self::load(&path)
        } else {
            debug!(root = %root.display(), "No {} found, using built-in patches", CONFIG_FILE_NAME);
            Ok(Self::builtin())
        }
    }

    pub fn get(&self, name: &str) -> Option<&PatchDefinition> {
        self.patches.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PatchDefinition> {
        self.patches.iter()
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn to_toml_string(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
