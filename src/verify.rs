//! Restore-and-check oracle for a Time Machine sparsebundle.
//!
//! One probe:
//! 1. rsync the bundle out of the snapshot (`<mountpoint>/.zfs/snapshot/<snap>/`)
//!    into the local working copy;
//! 2. clear the immutable flag on the bundle and its token (best-effort);
//! 3. hdiutil attach -nomount -noverify -noautofsck;
//! 4. fsck_hfs -dfry -c <cache>; on failure one repair pass (-p) and a re-check;
//! 5. hdiutil detach, always.
//!
//! Exit 0 of the final check is GOOD, any other exit code is BAD. Sync or attach
//! failures and a check killed by a signal are errors, not verdicts.

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::FixerConfig;
use crate::exec::{CommandRunner, SshTarget};
use crate::metrics::{record_fsck_repair_pass, record_sync_run};
use crate::search::Verdict;
use crate::snapshot::Snapshot;

pub const MACHINE_ID_PLIST: &str = "com.apple.TimeMachine.MachineID.plist";
pub const DECLINED_DATE_KEY: &str = "<key>RecoveryBackupDeclinedDate</key>";

/// Pass/fail oracle for one candidate snapshot.
pub trait Verifier {
    /// Restore `candidate` into the working copy and check it.
    /// Err is a verification fault, never a BAD verdict.
    fn verify(&mut self, candidate: &Snapshot) -> Result<Verdict>;

    /// Leave `found` as the working copy.
    fn promote(&mut self, found: &Snapshot) -> Result<()>;
}

/// Where the bundle lives remotely and locally.
#[derive(Debug, Clone)]
pub struct BundleLayout {
    pub remote: SshTarget,
    /// Dataset mountpoint on the NAS, e.g. /mnt/tank/tm
    pub mountpoint: String,
    /// Bundle name without the `.sparsebundle` extension.
    pub bundle: String,
    pub work_dir: PathBuf,
}

impl BundleLayout {
    pub fn from_config(cfg: &FixerConfig, bundle: &str) -> Self {
        Self {
            remote: cfg.ssh_target(),
            mountpoint: cfg.mountpoint(),
            bundle: bundle.trim_end_matches(".sparsebundle").to_string(),
            work_dir: cfg.work_dir.clone(),
        }
    }

    pub fn bundle_dir_name(&self) -> String {
        format!("{}.sparsebundle", self.bundle)
    }

    pub fn local_bundle(&self) -> PathBuf {
        self.work_dir.join(self.bundle_dir_name())
    }

    /// rsync source for a snapshot, with trailing slash (copy contents).
    pub fn remote_source(&self, snap: &Snapshot) -> String {
        format!(
            "{}:{}/.zfs/snapshot/{}/{}/",
            self.remote.destination(),
            self.mountpoint,
            snap.short_name(),
            self.bundle_dir_name()
        )
    }
}

pub struct ImageVerifier<R: CommandRunner> {
    runner: R,
    layout: BundleLayout,
    fsck_cache: String,
    // snapshot currently materialized in the working copy
    staged: Option<String>,
}

impl<R: CommandRunner> ImageVerifier<R> {
    pub fn new(runner: R, layout: BundleLayout) -> Self {
        Self {
            runner,
            layout,
            fsck_cache: "1g".to_string(),
            staged: None,
        }
    }

    pub fn with_fsck_cache<S: Into<String>>(mut self, cache: S) -> Self {
        self.fsck_cache = cache.into();
        self
    }

    pub fn layout(&self) -> &BundleLayout {
        &self.layout
    }

    pub fn staged(&self) -> Option<&str> {
        self.staged.as_deref()
    }

    fn sync(&mut self, snap: &Snapshot) -> Result<()> {
        let dst = self.layout.local_bundle();
        fs::create_dir_all(&dst).with_context(|| format!("create {}", dst.display()))?;

        let mut args: Vec<String> = vec![
            "-a".to_string(),
            "--delete".to_string(),
            "--inplace".to_string(),
        ];
        let ssh_opts = self.layout.remote.ssh_options();
        if ssh_opts.len() > 2 {
            // non-default port/identity
            args.push("-e".to_string());
            args.push(format!("ssh {}", ssh_opts.join(" ")));
        }
        args.push(self.layout.remote_source(snap));
        args.push(format!("{}/", dst.display()));

        // working copy is in an unknown state from here on
        self.staged = None;
        info!("sync: {} -> {}", snap.id(), dst.display());
        self.runner
            .run("rsync", &args)?
            .check("rsync")
            .with_context(|| format!("sync {}", snap.id()))?;
        record_sync_run();
        self.staged = Some(snap.id().to_string());
        Ok(())
    }

    fn unlock_flags(&self, bundle: &Path) {
        let args = vec![
            "nouchg".to_string(),
            bundle.display().to_string(),
            bundle.join("token").display().to_string(),
        ];
        if let Err(e) = self.runner.run("chflags", &args).and_then(|o| o.check("chflags")) {
            warn!("chflags: {:#}", e);
        }
    }

    /// attach + fsck + detach of a local bundle, no sync.
    pub fn check_bundle(&self, bundle: &Path) -> Result<Verdict> {
        let attach_args = vec![
            "attach".to_string(),
            "-nomount".to_string(),
            "-noverify".to_string(),
            "-noautofsck".to_string(),
            bundle.display().to_string(),
        ];
        let out = self
            .runner
            .run("hdiutil", &attach_args)?
            .check("hdiutil attach")
            .with_context(|| format!("attach {}", bundle.display()))?;
        let device = match parse_attach_device(&out.stdout) {
            Some(d) => d,
            None => {
                // image is attached anyway: release it before the next sync
                if let Some(disk) = parse_attached_disk(&out.stdout) {
                    self.detach(&disk);
                }
                return Err(anyhow!(
                    "hdiutil attach: no HFS device in output '{}'",
                    out.stdout.trim()
                ));
            }
        };
        debug!("attach: {} -> {}", bundle.display(), device);

        let verdict = self.fsck(&device);
        self.detach(&device);
        verdict
    }

    fn detach(&self, device: &str) {
        let detach = self
            .runner
            .run("hdiutil", &["detach".to_string(), device.to_string()])
            .and_then(|o| o.check("hdiutil detach"));
        if let Err(e) = detach {
            warn!("detach {}: {:#}", device, e);
        }
    }

    fn fsck(&self, device: &str) -> Result<Verdict> {
        let check_args = vec![
            "-dfry".to_string(),
            "-c".to_string(),
            self.fsck_cache.clone(),
            device.to_string(),
        ];
        let first = self.runner.run("fsck_hfs", &check_args)?;
        match first.code {
            Some(0) => return Ok(Verdict::Good),
            None => return Err(anyhow!("fsck_hfs on {} killed by signal", device)),
            Some(code) => info!("fsck_hfs {}: exit {}, trying repair pass", device, code),
        }

        record_fsck_repair_pass();
        let repair = self
            .runner
            .run("fsck_hfs", &["-p".to_string(), device.to_string()])?;
        if repair.code.is_none() {
            return Err(anyhow!("fsck_hfs -p on {} killed by signal", device));
        }

        let second = self.runner.run("fsck_hfs", &check_args)?;
        match second.code {
            Some(0) => Ok(Verdict::Good),
            Some(code) => {
                debug!("fsck_hfs {}: exit {} after repair: {}", device, code, second.stderr.trim());
                Ok(Verdict::Bad)
            }
            None => Err(anyhow!("fsck_hfs on {} killed by signal", device)),
        }
    }

    /// Drop the "backup declined" marker so Time Machine resumes using the bundle.
    /// Keeps a copy of the untouched file as `<plist>.bck`.
    pub fn clear_declined_marker(&self) -> Result<bool> {
        let plist = self.layout.local_bundle().join(MACHINE_ID_PLIST);
        if !plist.exists() {
            warn!("{} not found, nothing to clear", plist.display());
            return Ok(false);
        }
        let text = fs::read_to_string(&plist).with_context(|| format!("read {}", plist.display()))?;
        if !text.contains(DECLINED_DATE_KEY) {
            return Ok(false);
        }
        let backup = plist.with_extension("plist.bck");
        fs::copy(&plist, &backup)
            .with_context(|| format!("copy {} -> {}", plist.display(), backup.display()))?;
        fs::write(&plist, text.replace(DECLINED_DATE_KEY, ""))
            .with_context(|| format!("write {}", plist.display()))?;
        info!("cleared RecoveryBackupDeclinedDate in {}", plist.display());
        Ok(true)
    }
}

impl<R: CommandRunner> Verifier for ImageVerifier<R> {
    fn verify(&mut self, candidate: &Snapshot) -> Result<Verdict> {
        self.sync(candidate)?;
        let bundle = self.layout.local_bundle();
        self.unlock_flags(&bundle);
        self.check_bundle(&bundle)
    }

    fn promote(&mut self, found: &Snapshot) -> Result<()> {
        if self.staged.as_deref() != Some(found.id()) {
            self.sync(found)?;
        }
        self.clear_declined_marker()?;
        info!("working copy is now {}", found);
        Ok(())
    }
}

/// HFS device from `hdiutil attach` output.
///
/// Prefers the line tagged Apple_HFS/Apple_HFSX; otherwise the second to last
/// whitespace token of the whole output.
pub fn parse_attach_device(stdout: &str) -> Option<String> {
    for line in stdout.lines() {
        let mut fields = line.split_whitespace();
        let dev = match fields.next() {
            Some(d) if d.starts_with("/dev/") => d,
            _ => continue,
        };
        if fields.any(|f| f == "Apple_HFS" || f == "Apple_HFSX") {
            return Some(dev.to_string());
        }
    }
    let tokens: Vec<&str> = stdout.split_whitespace().collect();
    if tokens.len() < 2 {
        return None;
    }
    let dev = tokens[tokens.len() - 2];
    dev.starts_with("/dev/").then(|| dev.to_string())
}

/// First `/dev/` entry of `hdiutil attach` output: the whole disk.
pub fn parse_attached_disk(stdout: &str) -> Option<String> {
    stdout
        .split_whitespace()
        .find(|t| t.starts_with("/dev/"))
        .map(|t| t.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_device_from_partition_table() {
        let out = "/dev/disk2          \tGUID_partition_scheme          \t\n\
                   /dev/disk2s1        \tEFI                            \t\n\
                   /dev/disk2s2        \tApple_HFS                      \t\n";
        assert_eq!(parse_attach_device(out).as_deref(), Some("/dev/disk2s2"));
    }

    #[test]
    fn attach_device_fallback_second_to_last_token() {
        let out = "/dev/disk3 GUID_partition_scheme /dev/disk3s2 Apple_CoreStorage";
        assert_eq!(parse_attach_device(out).as_deref(), Some("/dev/disk3s2"));
        assert_eq!(parse_attach_device(""), None);
        assert_eq!(parse_attach_device("nothing useful here"), None);
    }

    #[test]
    fn whole_disk_without_hfs_partition() {
        let out = "/dev/disk5 GUID_partition_scheme\n/dev/disk5s1 EFI Apple_APFS";
        assert_eq!(parse_attach_device(out), None);
        assert_eq!(parse_attached_disk(out).as_deref(), Some("/dev/disk5"));
        assert_eq!(parse_attached_disk(""), None);
    }
}
