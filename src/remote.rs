//! ZFS side of the fixer: snapshot listing and rollback points on the NAS.
//!
//! Commands (run through a CommandRunner, normally an SshRunner):
//!   zfs list -H -r -t snapshot -o name,used <dataset>
//!   [sudo] zfs snapshot -r <dataset>@time-machine-fixer-rollback-YYYYmmdd-HHMMSS
//!   [sudo] zfs destroy -r <rollback name>

use anyhow::{anyhow, Result};
use chrono::{Local, NaiveDateTime};
use log::{debug, info, warn};

use crate::config::FixerConfig;
use crate::error::FixError;
use crate::exec::CommandRunner;
use crate::metrics::{record_rollback_created, record_rollback_destroyed};

pub const ROLLBACK_PREFIX: &str = "time-machine-fixer-rollback-";

/// Supplies raw snapshot identifiers for the catalog.
pub trait SnapshotSource {
    /// Err maps to `FixError::RemoteUnavailable`.
    fn list_snapshots(&mut self) -> Result<Vec<String>>;
}

/// Safety snapshot taken before the first destructive restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackPoint {
    pub name: String,
}

pub trait RollbackPoints {
    fn create_rollback_point(&mut self) -> Result<RollbackPoint>;
    fn destroy_rollback_point(&mut self, point: RollbackPoint) -> Result<()>;
}

pub struct ZfsRemote<R: CommandRunner> {
    runner: R,
    dataset: String,
    prefix: String,
    skip_unchanged: bool,
    use_sudo: bool,
}

impl<R: CommandRunner> ZfsRemote<R> {
    pub fn new<S: Into<String>>(runner: R, dataset: S) -> Self {
        Self {
            runner,
            dataset: dataset.into(),
            prefix: "auto".to_string(),
            skip_unchanged: true,
            use_sudo: true,
        }
    }

    /// Dataset, prefix, sudo and unchanged-snapshot policy from the config.
    pub fn from_config(runner: R, cfg: &FixerConfig) -> Self {
        Self::new(runner, cfg.dataset.clone())
            .with_prefix(cfg.snapshot_prefix.clone())
            .with_skip_unchanged(cfg.skip_unchanged)
            .with_sudo(cfg.use_sudo)
    }

    pub fn with_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_skip_unchanged(mut self, on: bool) -> Self {
        self.skip_unchanged = on;
        self
    }

    pub fn with_sudo(mut self, on: bool) -> Self {
        self.use_sudo = on;
        self
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Rollback snapshot name for a given wall-clock time.
    pub fn rollback_name(&self, at: NaiveDateTime) -> String {
        format!(
            "{}@{}{}",
            self.dataset,
            ROLLBACK_PREFIX,
            at.format("%Y%m%d-%H%M%S")
        )
    }

    fn zfs(&self, args: &[&str]) -> (String, Vec<String>) {
        let mut v: Vec<String> = Vec::with_capacity(args.len() + 1);
        let program = if self.use_sudo {
            v.push("zfs".to_string());
            "sudo"
        } else {
            "zfs"
        };
        v.extend(args.iter().map(|s| s.to_string()));
        (program.to_string(), v)
    }

    /// Filter `zfs list -H -o name,used` output down to searchable snapshots.
    pub fn parse_listing(&self, stdout: &str) -> Vec<String> {
        let wanted = format!("{}@{}", self.dataset, self.prefix);
        let mut out = Vec::new();
        for line in stdout.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let (name, used) = match fields.as_slice() {
                [name, used] => (*name, *used),
                [] => continue,
                _ => {
                    debug!("zfs list: ignoring line '{}'", line);
                    continue;
                }
            };
            // header of a listing without -H, child datasets, manual snapshots
            if !name.starts_with(&wanted) {
                continue;
            }
            if self.skip_unchanged && used == "0" {
                continue;
            }
            out.push(name.to_string());
        }
        out
    }
}

impl<R: CommandRunner> SnapshotSource for ZfsRemote<R> {
    fn list_snapshots(&mut self) -> Result<Vec<String>> {
        let args: Vec<String> = ["list", "-H", "-r", "-t", "snapshot", "-o", "name,used"]
            .iter()
            .map(|s| s.to_string())
            .chain(std::iter::once(self.dataset.clone()))
            .collect();

        let out = self
            .runner
            .run("zfs", &args)
            .and_then(|o| o.check("zfs list"))
            .map_err(|e| anyhow!(FixError::RemoteUnavailable(format!("{:#}", e))))?;

        let names = self.parse_listing(&out.stdout);
        debug!("zfs list: {} snapshot(s) of {}", names.len(), self.dataset);
        Ok(names)
    }
}

impl<R: CommandRunner> RollbackPoints for ZfsRemote<R> {
    fn create_rollback_point(&mut self) -> Result<RollbackPoint> {
        let name = self.rollback_name(Local::now().naive_local());
        let (program, args) = self.zfs(&["snapshot", "-r", name.as_str()]);
        info!("rollback: creating {}", name);

        let out = self
            .runner
            .run(&program, &args)
            .and_then(|o| o.check("zfs snapshot"))
            .map_err(|e| anyhow!(FixError::RemoteUnavailable(format!("{:#}", e))))?;
        if !out.stderr.trim().is_empty() {
            warn!("zfs snapshot: {}", out.stderr.trim());
        }
        record_rollback_created();
        Ok(RollbackPoint { name })
    }

    fn destroy_rollback_point(&mut self, point: RollbackPoint) -> Result<()> {
        // never destroy anything that is not one of ours
        let ours = point
            .name
            .split_once('@')
            .map(|(ds, snap)| ds == self.dataset && snap.starts_with(ROLLBACK_PREFIX))
            .unwrap_or(false);
        if !ours {
            return Err(anyhow!(
                "refusing to destroy '{}': not a rollback point of {}",
                point.name,
                self.dataset
            ));
        }

        let (program, args) = self.zfs(&["destroy", "-r", point.name.as_str()]);
        info!("rollback: destroying {}", point.name);
        self.runner
            .run(&program, &args)
            .and_then(|o| o.check("zfs destroy"))
            .map_err(|e| anyhow!(FixError::RemoteUnavailable(format!("{:#}", e))))?;
        record_rollback_destroyed();
        Ok(())
    }
}
