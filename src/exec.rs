//! External command execution.
//!
//! Every tool the fixer drives (zfs, rsync, hdiutil, fsck_hfs) goes through
//! `CommandRunner`, so tests can script outputs without touching a real NAS.
//! - LocalRunner: std::process::Command on this host.
//! - SshRunner: the same command wrapped into `ssh ... host -- <cmd>`.

use anyhow::{anyhow, Context, Result};
use log::debug;
use std::path::PathBuf;
use std::process::Command;

/// Captured result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; None when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: &str) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: &str) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Err with stderr attached unless the command exited with 0.
    pub fn check(self, what: &str) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(anyhow!(
            "{} failed (exit {}): {}",
            what,
            self.code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            self.stderr.trim()
        ))
    }
}

pub trait CommandRunner {
    /// Run `program args..` to completion. Err only when the process could not
    /// be started; a non-zero exit is reported through `CommandOutput::code`.
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        (**self).run(program, args)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalRunner;

impl CommandRunner for LocalRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        debug!("exec: {} {}", program, args.join(" "));
        let out = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("spawn {}", program))?;
        Ok(CommandOutput {
            code: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    }
}

/// ssh connection parameters shared by the remote collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity: Option<PathBuf>,
}

impl SshTarget {
    pub fn new<S: Into<String>>(host: S) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            identity: None,
        }
    }

    /// `user@host` or plain `host`.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(u) => format!("{}@{}", u, self.host),
            None => self.host.clone(),
        }
    }

    /// ssh options before the destination (port, identity, batch mode).
    pub fn ssh_options(&self) -> Vec<String> {
        let mut args = vec!["-o".to_string(), "BatchMode=yes".to_string()];
        if let Some(p) = self.port {
            args.push("-p".to_string());
            args.push(p.to_string());
        }
        if let Some(id) = &self.identity {
            args.push("-i".to_string());
            args.push(id.display().to_string());
        }
        args
    }
}

/// Runs commands on a remote host through the local `ssh` client.
pub struct SshRunner<R: CommandRunner = LocalRunner> {
    target: SshTarget,
    local: R,
}

impl SshRunner<LocalRunner> {
    pub fn new(target: SshTarget) -> Self {
        Self::with_runner(target, LocalRunner)
    }
}

impl<R: CommandRunner> SshRunner<R> {
    pub fn with_runner(target: SshTarget, local: R) -> Self {
        Self { target, local }
    }

    pub fn target(&self) -> &SshTarget {
        &self.target
    }
}

impl<R: CommandRunner> CommandRunner for SshRunner<R> {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let mut remote = shell_quote(program);
        for a in args {
            remote.push(' ');
            remote.push_str(&shell_quote(a));
        }

        let mut ssh_args = self.target.ssh_options();
        ssh_args.push(self.target.destination());
        ssh_args.push("--".to_string());
        ssh_args.push(remote);
        self.local
            .run("ssh", &ssh_args)
            .with_context(|| format!("ssh {}", self.target.destination()))
    }
}

/// POSIX shell quoting; plain words pass through unchanged.
pub fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./@:=,+%".contains(&b));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}
