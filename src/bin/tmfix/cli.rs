use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Восстановление Time Machine sparsebundle из ZFS-снапшотов
#[derive(Parser, Debug)]
#[command(
    name = "tmfix",
    version,
    about = "Find and restore the newest sound Time Machine snapshot",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Config file (TOML). Default: ~/.time-machine-fixer.toml if present
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (error|warn|info|debug|trace)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Write log to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Search the snapshot history and restore the newest good bundle
    ///
    /// Пример:
    ///   tmfix fix MyMacBook
    ///   tmfix fix MyMacBook --json
    Fix {
        /// Sparsebundle name without the extension (e.g. "MyMacBook")
        sparsebundle: String,
        /// JSON report on stdout
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List searchable snapshots, newest first
    List {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Structural check (attach + fsck_hfs) of a local sparsebundle
    Check {
        /// Path to <name>.sparsebundle
        path: PathBuf,
    },
    /// Dry run of the search order on the live catalog, no restore
    ///
    /// Every snapshot taken at or before --good-from is treated as GOOD,
    /// everything newer as BAD. Without --good-from all are BAD.
    Plan {
        #[arg(long)]
        good_from: Option<String>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}
