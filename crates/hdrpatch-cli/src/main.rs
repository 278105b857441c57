//! # hdrpatch CLI
//!
//! Applies idempotent header patches to vendored sources before a build.
//!
//! ## Commands
//!
//! - `hdrpatch apply [NAME...]` - Apply patches (all when none named)
//! - `hdrpatch check [NAME...]` - Report patch state without writing
//! - `hdrpatch list` - Show configured patches
//!
//! ## Exit codes
//!
//! `0` applied or already applied, `2` target missing, `3` marker missing,
//! `4` I/O failure, `1` anything else.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use hdrpatch_config::{PatchDefinition, PatchSet};
use hdrpatch_core::{ApplyOptions, Outcome, PatchError};

/// hdrpatch - idempotent patches for vendored headers
#[derive(Parser)]
#[command(name = "hdrpatch")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Project root that patch targets are relative to
    #[arg(long, env = "HDRPATCH_ROOT", default_value = ".")]
    root: PathBuf,

    /// Patch definition file (default: <root>/hdrpatch.toml, else built-ins)
    #[arg(long, env = "HDRPATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply patches to their target files
    Apply {
        /// Patches to apply (default: all)
        #[arg(value_name = "NAME")]
        names: Vec<String>,

        /// Serialize concurrent runs on an advisory lock file
        #[arg(long)]
        lock: bool,

        /// Patch this file instead of the configured target (one patch only)
        #[arg(long, value_name = "FILE")]
        target: Option<PathBuf>,
    },

    /// Report whether each patch is pending or applied, without writing
    Check {
        /// Patches to check (default: all)
        #[arg(value_name = "NAME")]
        names: Vec<String>,

        /// Check this file instead of the configured target (one patch only)
        #[arg(long, value_name = "FILE")]
        target: Option<PathBuf>,
    },

    /// List configured patches
    List,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    let patches = load_patches(&cli.root, cli.config.as_deref())?;

    match cli.command {
        Commands::Apply {
            names,
            lock,
            target,
        } => cmd_apply(&cli.root, &patches, &names, lock, target.as_deref()),
        Commands::Check { names, target } => {
            cmd_check(&cli.root, &patches, &names, target.as_deref())
        }
        Commands::List => cmd_list(&cli.root, &patches),
    }
}

fn load_patches(root: &Path, config: Option<&Path>) -> Result<PatchSet> {
    let patches = match config {
        Some(path) => PatchSet::load(path)
            .with_context(|| format!("Failed to load patch file {}", path.display()))?,
        None => PatchSet::discover(root)
            .with_context(|| format!("Failed to load patches under {}", root.display()))?,
    };
    if patches.is_empty() {
        warn!("No patches configured");
    }
    Ok(patches)
}

/// Pick the named definitions, or all of them when `names` is empty.
fn select<'a>(patches: &'a PatchSet, names: &[String]) -> Result<Vec<&'a PatchDefinition>> {
    if names.is_empty() {
        return Ok(patches.iter().collect());
    }
    names
        .iter()
        .map(|name| {
            patches
                .get(name)
                .with_context(|| format!("Unknown patch: {}", name))
        })
        .collect()
}

/// `--target` replaces the configured path and only makes sense for one patch.
fn check_override(selected: &[&PatchDefinition], target_override: Option<&Path>) -> Result<()> {
    if target_override.is_some() && selected.len() != 1 {
        anyhow::bail!(
            "--target needs exactly one patch, {} selected",
            selected.len()
        );
    }
    Ok(())
}

fn target_for(def: &PatchDefinition, root: &Path, target_override: Option<&Path>) -> PathBuf {
    target_override
        .map(Path::to_path_buf)
        .unwrap_or_else(|| def.resolve_target(root))
}

/// Apply the selected patches, continuing past failures
fn cmd_apply(
    root: &Path,
    patches: &PatchSet,
    names: &[String],
    lock: bool,
    target_override: Option<&Path>,
) -> Result<ExitCode> {
    let selected = select(patches, names)?;
    check_override(&selected, target_override)?;

    let options = ApplyOptions { lock };
    let mut status = Status::default();

    for def in selected {
        let patch = def.to_patch()?;
        let target = target_for(def, root, target_override);
        debug!(patch = %def.name, target = %target.display(), "Applying");

        match hdrpatch_core::apply_with(&target, &patch, &options) {
            Ok(report) => match report.outcome {
                Outcome::Applied { line } => {
                    println!(
                        "✓ {}: injected at line {} of {}",
                        def.name,
                        line,
                        report.path.display()
                    );
                }
                Outcome::AlreadyApplied { .. } => {
                    println!("⚠️  {}: already applied, skipping", def.name);
                }
            },
            Err(e) => {
                println!("✗ {}: {}", def.name, e);
                status.record(&e);
            }
        }
    }

    Ok(status.exit_code())
}

/// Dry run: plan each selected patch
fn cmd_check(
    root: &Path,
    patches: &PatchSet,
    names: &[String],
    target_override: Option<&Path>,
) -> Result<ExitCode> {
    let selected = select(patches, names)?;
    check_override(&selected, target_override)?;
    let mut status = Status::default();

    for def in selected {
        let patch = def.to_patch()?;
        let target = target_for(def, root, target_override);

        match hdrpatch_core::plan(&target, &patch) {
            Ok(plan) => {
                println!("  {:<24} {}", def.name, plan);
            }
            Err(e) => {
                println!("  {:<24} error: {}", def.name, e);
                status.record(&e);
            }
        }
    }

    Ok(status.exit_code())
}

fn cmd_list(root: &Path, patches: &PatchSet) -> Result<ExitCode> {
    println!("Patches");
    println!("=======");

    for def in patches.iter() {
        let target = def.resolve_target(root);
        let state = if target.is_file() { "" } else { " (missing)" };
        println!();
        println!("{}", def.name);
        println!("  Target:   {}{}", target.display(), state);
        println!("  Marker:   {}", def.marker);
        println!("  Sentinel: {}", def.sentinel);
    }

    Ok(ExitCode::SUCCESS)
}

/// First failure across a run decides the exit code.
#[derive(Default)]
struct Status {
    first_failure: Option<u8>,
}

impl Status {
    fn record(&mut self, err: &PatchError) {
        self.first_failure.get_or_insert(exit_code(err));
    }

    fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.first_failure.unwrap_or(0))
    }
}

fn exit_code(err: &PatchError) -> u8 {
    match err {
        PatchError::NotFound { .. } => 2,
        PatchError::MarkerNotFound { .. } => 3,
        PatchError::Io { .. } => 4,
        PatchError::InvalidPatch(_) => 1,
    }
}
