//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Halyard - Declarative release manager.
#[derive(Parser, Debug)]
#[command(name = "halyard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "HALYARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Namespace of the release (overrides the configured default).
    #[arg(short, long, global = true)]
    pub namespace: Option<String>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install a bundle as a new release.
    Install {
        /// Release name.
        release: String,

        /// Path to the bundle directory.
        bundle: PathBuf,

        /// Values overrides.
        #[command(flatten)]
        values: ValuesArgs,
    },

    /// Upgrade a release to a new bundle or values.
    Upgrade {
        /// Release name.
        release: String,

        /// Path to the bundle directory.
        bundle: PathBuf,

        /// Install the release if nothing is deployed.
        #[arg(short, long)]
        install: bool,

        /// Values overrides.
        #[command(flatten)]
        values: ValuesArgs,
    },

    /// Roll a release back to a previous revision.
    Rollback {
        /// Release name.
        release: String,

        /// Revision to restore (defaults to the previous deployed revision).
        revision: Option<u32>,
    },

    /// Delete every resource of a release.
    Uninstall {
        /// Release name.
        release: String,
    },

    /// Show the revision history of a release.
    History {
        /// Release name.
        release: String,

        /// Maximum number of revisions to show.
        #[arg(long, default_value = "256")]
        max: usize,
    },

    /// Show the live status of a release.
    Status {
        /// Release name.
        release: String,
    },

    /// List releases.
    List {
        /// List releases in every namespace.
        #[arg(short = 'A', long)]
        all_namespaces: bool,
    },

    /// Render a bundle locally and print the manifests.
    Template {
        /// Release name.
        release: String,

        /// Path to the bundle directory.
        bundle: PathBuf,

        /// Values overrides.
        #[command(flatten)]
        values: ValuesArgs,
    },

    /// Preview the plan an upgrade would execute.
    Diff {
        /// Release name.
        release: String,

        /// Path to the bundle directory.
        bundle: PathBuf,

        /// Show changed fields for each update.
        #[arg(short, long)]
        detailed: bool,

        /// Values overrides.
        #[command(flatten)]
        values: ValuesArgs,
    },

    /// Create a new bundle skeleton.
    Create {
        /// Bundle name (also the directory created).
        name: String,

        /// Parent directory.
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the configuration file.
    Validate {
        /// Show warnings as well as errors.
        #[arg(short, long)]
        warnings: bool,
    },
}

/// Values layered over the bundle defaults.
#[derive(Args, Debug, Default, Clone)]
pub struct ValuesArgs {
    /// Values file (may be repeated; later files win).
    #[arg(short = 'f', long = "values")]
    pub files: Vec<PathBuf>,

    /// Set a value on the command line (`path=value`, may be repeated).
    #[arg(long = "set")]
    pub set: Vec<String>,
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable log lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}
