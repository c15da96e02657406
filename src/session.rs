//! Fixer session: list → catalog → rollback point → search loop → promote.
//!
//! The rollback point is released on every exit path once it was created,
//! whether the search found a snapshot, exhausted the catalog or failed.

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use serde::Serialize;

use crate::catalog::Catalog;
use crate::error::FixError;
use crate::metrics::{
    metrics_snapshot, record_probe, record_verify_error, record_verify_retry, MetricsSnapshot,
};
use crate::remote::{RollbackPoints, SnapshotSource};
use crate::search::{drive, Outcome, ProbeRecord, SearchEngine, Verdict, DEFAULT_STEP_DAYS};
use crate::snapshot::Snapshot;
use crate::verify::Verifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub step_days: u32,
    /// Extra attempts after a verification fault before the session aborts.
    pub verify_retries: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            step_days: DEFAULT_STEP_DAYS,
            verify_retries: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    /// Identifier of the restored snapshot; None when no good snapshot exists.
    pub found: Option<String>,
    pub rollback_point: Option<String>,
    pub catalog_size: usize,
    pub rejected: Vec<String>,
    pub probes: Vec<ProbeRecord>,
    pub metrics: MetricsSnapshot,
}

impl SessionReport {
    pub fn found_or_err(&self) -> std::result::Result<&str, FixError> {
        self.found.as_deref().ok_or(FixError::NotFound {
            probes: self.probes.len(),
        })
    }
}

pub struct Session<S, V, B> {
    source: S,
    verifier: V,
    rollback: B,
    options: SessionOptions,
}

impl<S, V, B> Session<S, V, B>
where
    S: SnapshotSource,
    V: Verifier,
    B: RollbackPoints,
{
    pub fn new(source: S, verifier: V, rollback: B, options: SessionOptions) -> Self {
        Self {
            source,
            verifier,
            rollback,
            options,
        }
    }

    pub fn verifier(&self) -> &V {
        &self.verifier
    }

    pub fn rollback(&self) -> &B {
        &self.rollback
    }

    pub fn into_parts(self) -> (S, V, B) {
        (self.source, self.verifier, self.rollback)
    }

    pub fn run(&mut self) -> Result<SessionReport> {
        let ids = self.source.list_snapshots().context("list snapshots")?;
        let build = Catalog::build(&ids)?;
        let catalog = build.catalog;
        let rejected: Vec<String> = build.rejected.iter().map(|e| e.to_string()).collect();
        if catalog.is_empty() {
            return Err(anyhow!(FixError::EmptyCatalog));
        }
        if let Some((oldest, newest)) = catalog.span() {
            info!(
                "session: {} snapshot(s) from {} to {}",
                catalog.len(),
                oldest,
                newest
            );
        }

        let point = self
            .rollback
            .create_rollback_point()
            .context("create rollback point")?;
        let point_name = point.name.clone();

        let searched = self.search(&catalog);

        let released = self
            .rollback
            .destroy_rollback_point(point)
            .with_context(|| format!("destroy rollback point {}", point_name));

        let (found, probes) = match (searched, released) {
            (Ok(v), Ok(())) => v,
            (Ok(_), Err(e)) => return Err(e),
            (Err(e), Ok(())) => return Err(e),
            (Err(e), Err(release_err)) => {
                error!("session: {:#}", release_err);
                return Err(e);
            }
        };

        match &found {
            Some(id) => info!("session: restored {} after {} probe(s)", id, probes.len()),
            None => warn!("session: no good snapshot after {} probe(s)", probes.len()),
        }

        Ok(SessionReport {
            found,
            rollback_point: Some(point_name),
            catalog_size: catalog.len(),
            rejected,
            probes,
            metrics: metrics_snapshot(),
        })
    }

    fn search(&mut self, catalog: &Catalog) -> Result<(Option<String>, Vec<ProbeRecord>)> {
        let mut engine = SearchEngine::with_step_days(catalog, self.options.step_days)?;
        let retries = self.options.verify_retries;
        let verifier = &mut self.verifier;

        let outcome = drive(&mut engine, |candidate| {
            verify_with_retry(&mut *verifier, candidate, retries)
        })?;

        let found = match outcome {
            Outcome::Found(snap) => {
                self.verifier
                    .promote(snap)
                    .with_context(|| format!("promote {}", snap.id()))?;
                Some(snap.id().to_string())
            }
            Outcome::NotFound => None,
        };
        Ok((found, engine.trail().to_vec()))
    }
}

/// One probe with the retry policy: a fault is retried `retries` times, then
/// surfaces as `FixError::Verification`.
pub fn verify_with_retry<V: Verifier + ?Sized>(
    verifier: &mut V,
    candidate: &Snapshot,
    retries: u32,
) -> Result<Verdict> {
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        match verifier.verify(candidate) {
            Ok(verdict) => {
                record_probe(verdict == Verdict::Good);
                return Ok(verdict);
            }
            Err(e) => {
                record_verify_error();
                if attempts > retries {
                    return Err(anyhow!(FixError::Verification {
                        snapshot: candidate.id().to_string(),
                        attempts,
                        message: format!("{:#}", e),
                    }));
                }
                record_verify_retry();
                warn!(
                    "verify {}: attempt {} failed, retrying: {:#}",
                    candidate.id(),
                    attempts,
                    e
                );
            }
        }
    }
}
