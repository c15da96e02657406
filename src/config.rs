//! Centralized configuration for tmfix.
//!
//! Sources, lowest to highest priority:
//! - built-in defaults (`FixerConfig::default()`);
//! - TOML file, by default `$HOME/.time-machine-fixer.toml`;
//! - environment variables `TMF_*`;
//! - explicit `with_*` overrides (CLI flags).
//!
//! Example file:
//!   host = "freenas.local"
//!   dataset = "tank/backups/timemachine"
//!   work_dir = "/Volumes/Time Machine"
//!   ssh_user = "backup"

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::exec::SshTarget;
use crate::search::DEFAULT_STEP_DAYS;

pub const DEFAULT_CONFIG_FILE: &str = ".time-machine-fixer.toml";

#[derive(Clone, Debug, PartialEq)]
pub struct FixerConfig {
    /// NAS hostname. Env: TMF_HOST
    pub host: String,
    pub ssh_user: Option<String>,
    pub ssh_port: Option<u16>,
    pub ssh_identity: Option<PathBuf>,

    /// ZFS dataset holding the sparsebundles. Env: TMF_DATASET
    pub dataset: String,
    /// Mountpoint of the dataset on the NAS (default "/mnt/<dataset>").
    pub dataset_mountpoint: Option<String>,
    /// Only snapshots named "<dataset>@<prefix>-..." take part in the search.
    pub snapshot_prefix: String,
    /// Ignore snapshots whose `used` column is 0 (no changes since the previous one).
    pub skip_unchanged: bool,
    /// Prefix zfs snapshot/destroy with sudo. Env: TMF_USE_SUDO
    pub use_sudo: bool,

    /// Local directory holding the working copy of the sparsebundle. Env: TMF_WORK_DIR
    pub work_dir: PathBuf,
    /// fsck_hfs cache size (`-c`).
    pub fsck_cache: String,
    /// Extra attempts after a verification fault. Env: TMF_VERIFY_RETRIES
    pub verify_retries: u32,
    /// Coarse search step in days. Env: TMF_STEP_DAYS
    pub step_days: u32,

    /// Optional log file (stderr otherwise). Env: TMF_LOG_FILE
    pub log_file: Option<PathBuf>,
}

impl Default for FixerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            ssh_user: None,
            ssh_port: None,
            ssh_identity: None,

            dataset: String::new(),
            dataset_mountpoint: None,
            snapshot_prefix: "auto".to_string(),
            skip_unchanged: true,
            use_sudo: true,

            work_dir: PathBuf::from("/Volumes/Time Machine"),
            fsck_cache: "1g".to_string(),
            verify_retries: 1,
            step_days: DEFAULT_STEP_DAYS,

            log_file: None,
        }
    }
}

/// On-disk form: every key optional, unknown keys rejected.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    host: Option<String>,
    ssh_user: Option<String>,
    ssh_port: Option<u16>,
    ssh_identity: Option<PathBuf>,
    dataset: Option<String>,
    dataset_mountpoint: Option<String>,
    snapshot_prefix: Option<String>,
    skip_unchanged: Option<bool>,
    use_sudo: Option<bool>,
    work_dir: Option<PathBuf>,
    fsck_cache: Option<String>,
    verify_retries: Option<u32>,
    step_days: Option<u32>,
    log_file: Option<PathBuf>,
}

fn env_flag(v: &str) -> bool {
    let s = v.trim().to_ascii_lowercase();
    s == "1" || s == "true" || s == "yes" || s == "on"
}

impl FixerConfig {
    /// `$HOME/.time-machine-fixer.toml`, if HOME is set.
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(DEFAULT_CONFIG_FILE))
    }

    /// Parse TOML text on top of the defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let file: FileConfig = toml::from_str(s).context("parse TOML config")?;
        let mut cfg = Self::default();
        cfg.merge_file(file);
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml_str(&s).with_context(|| format!("config {}", path.display()))
    }

    /// Resolve the full configuration: file (explicit path, or the default path
    /// when it exists) and then `TMF_*` environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut cfg = match explicit {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };
        cfg.apply_env();
        Ok(cfg)
    }

    fn merge_file(&mut self, f: FileConfig) {
        if let Some(v) = f.host {
            self.host = v;
        }
        self.ssh_user = f.ssh_user.or(self.ssh_user.take());
        self.ssh_port = f.ssh_port.or(self.ssh_port);
        self.ssh_identity = f.ssh_identity.or(self.ssh_identity.take());
        if let Some(v) = f.dataset {
            self.dataset = v;
        }
        self.dataset_mountpoint = f.dataset_mountpoint.or(self.dataset_mountpoint.take());
        if let Some(v) = f.snapshot_prefix {
            self.snapshot_prefix = v;
        }
        if let Some(v) = f.skip_unchanged {
            self.skip_unchanged = v;
        }
        if let Some(v) = f.use_sudo {
            self.use_sudo = v;
        }
        if let Some(v) = f.work_dir {
            self.work_dir = v;
        }
        if let Some(v) = f.fsck_cache {
            self.fsck_cache = v;
        }
        if let Some(v) = f.verify_retries {
            self.verify_retries = v;
        }
        if let Some(v) = f.step_days {
            self.step_days = v;
        }
        self.log_file = f.log_file.or(self.log_file.take());
    }

    /// Apply `TMF_*` environment overrides. Unparsable numbers are ignored.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("TMF_HOST") {
            if !v.trim().is_empty() {
                self.host = v.trim().to_string();
            }
        }
        if let Ok(v) = std::env::var("TMF_DATASET") {
            if !v.trim().is_empty() {
                self.dataset = v.trim().to_string();
            }
        }
        if let Ok(v) = std::env::var("TMF_WORK_DIR") {
            if !v.trim().is_empty() {
                self.work_dir = PathBuf::from(v.trim());
            }
        }
        if let Ok(v) = std::env::var("TMF_USE_SUDO") {
            self.use_sudo = env_flag(&v);
        }
        if let Ok(v) = std::env::var("TMF_VERIFY_RETRIES") {
            if let Ok(n) = v.trim().parse::<u32>() {
                self.verify_retries = n;
            }
        }
        if let Ok(v) = std::env::var("TMF_STEP_DAYS") {
            if let Ok(n) = v.trim().parse::<u32>() {
                self.step_days = n;
            }
        }
        if let Ok(v) = std::env::var("TMF_LOG_FILE") {
            if !v.trim().is_empty() {
                self.log_file = Some(PathBuf::from(v.trim()));
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("config: 'host' is required"));
        }
        if self.dataset.trim().is_empty() {
            return Err(anyhow!("config: 'dataset' is required"));
        }
        if self.dataset.contains('@') {
            return Err(anyhow!("config: 'dataset' must not contain '@'"));
        }
        if self.work_dir.as_os_str().is_empty() {
            return Err(anyhow!("config: 'work_dir' is required"));
        }
        if self.step_days == 0 {
            return Err(anyhow!("config: 'step_days' must be at least 1"));
        }
        if self.snapshot_prefix.is_empty() {
            return Err(anyhow!("config: 'snapshot_prefix' must not be empty"));
        }
        Ok(())
    }

    pub fn mountpoint(&self) -> String {
        match &self.dataset_mountpoint {
            Some(m) => m.trim_end_matches('/').to_string(),
            None => format!("/mnt/{}", self.dataset),
        }
    }

    pub fn ssh_target(&self) -> SshTarget {
        SshTarget {
            host: self.host.clone(),
            user: self.ssh_user.clone(),
            port: self.ssh_port,
            identity: self.ssh_identity.clone(),
        }
    }

    // ----- builder-style overrides -----

    pub fn with_host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_dataset<S: Into<String>>(mut self, dataset: S) -> Self {
        self.dataset = dataset.into();
        self
    }

    pub fn with_work_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn with_use_sudo(mut self, on: bool) -> Self {
        self.use_sudo = on;
        self
    }

    pub fn with_verify_retries(mut self, n: u32) -> Self {
        self.verify_retries = n;
        self
    }

    pub fn with_step_days(mut self, days: u32) -> Self {
        self.step_days = days;
        self
    }

    pub fn with_log_file(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.log_file = path;
        }
        self
    }
}

impl fmt::Display for FixerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FixerConfig {{ \
             host: {}, \
             dataset: {}, \
             mountpoint: {}, \
             prefix: {}, \
             skip_unchanged: {}, \
             use_sudo: {}, \
             work_dir: {}, \
             fsck_cache: {}, \
             verify_retries: {}, \
             step_days: {} \
             }}",
            self.ssh_target().destination(),
            self.dataset,
            self.mountpoint(),
            self.snapshot_prefix,
            self.skip_unchanged,
            self.use_sudo,
            self.work_dir.display(),
            self.fsck_cache,
            self.verify_retries,
            self.step_days,
        )
    }
}
