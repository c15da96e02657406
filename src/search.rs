//! Bisecting search over a snapshot catalog.
//!
//! Two phases:
//! - Coarse: step back from the newest snapshot in fixed calendar increments
//!   (one week by default) until a GOOD snapshot brackets the bad run.
//! - Refine: classic bisection over catalog indices between the newest known-bad
//!   (lower, exclusive) and the oldest known-good (upper, inclusive).
//!
//! The engine performs no I/O. The caller verifies `current()` and feeds the verdict
//! back through `advance`; probes are strictly serialized.

use chrono::Duration;
use log::{debug, info};
use serde::Serialize;

use crate::catalog::Catalog;
use crate::error::{FixError, FixResult};
use crate::snapshot::Snapshot;

pub const DEFAULT_STEP_DAYS: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Good,
    Bad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Coarse,
    Refine,
    Done,
}

/// Terminal result of a search session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<'a> {
    Found(&'a Snapshot),
    NotFound,
}

/// What the caller does next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<'a> {
    Probe(&'a Snapshot),
    Done(Outcome<'a>),
}

/// One verdict fed into the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeRecord {
    pub snapshot: String,
    pub verdict: Verdict,
    pub phase: Phase,
}

// Cursor indices point into the catalog (0 = newest).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Coarse { current: usize, lower: usize },
    Refine { lower: usize, upper: usize, current: usize },
    Done { found: Option<usize> },
}

pub struct SearchEngine<'a> {
    catalog: &'a Catalog,
    step: Duration,
    cursor: Cursor,
    probed: Vec<usize>,
    trail: Vec<ProbeRecord>,
}

impl<'a> SearchEngine<'a> {
    pub fn new(catalog: &'a Catalog) -> FixResult<Self> {
        Self::with_step_days(catalog, DEFAULT_STEP_DAYS)
    }

    pub fn with_step_days(catalog: &'a Catalog, days: u32) -> FixResult<Self> {
        if days == 0 {
            return Err(FixError::InvalidStep(
                "coarse step must be at least one day".to_string(),
            ));
        }
        if catalog.is_empty() {
            return Err(FixError::EmptyCatalog);
        }
        Ok(Self {
            catalog,
            step: Duration::days(i64::from(days)),
            cursor: Cursor::Coarse { current: 0, lower: 0 },
            probed: Vec::new(),
            trail: Vec::new(),
        })
    }

    pub fn phase(&self) -> Phase {
        match self.cursor {
            Cursor::Coarse { .. } => Phase::Coarse,
            Cursor::Refine { .. } => Phase::Refine,
            Cursor::Done { .. } => Phase::Done,
        }
    }

    /// Candidate awaiting a verdict, None once the search is done.
    pub fn current(&self) -> Option<&'a Snapshot> {
        match self.cursor {
            Cursor::Coarse { current, .. } | Cursor::Refine { current, .. } => {
                self.catalog.get(current)
            }
            Cursor::Done { .. } => None,
        }
    }

    pub fn outcome(&self) -> Option<Outcome<'a>> {
        match self.cursor {
            Cursor::Done { found } => Some(self.outcome_of(found)),
            _ => None,
        }
    }

    /// Bisection bracket: (oldest known-bad, newest known-good). The boundary lies
    /// between them. Each side is None until a verdict of that kind has been seen.
    pub fn bounds(&self) -> (Option<&'a Snapshot>, Option<&'a Snapshot>) {
        let catalog = self.catalog;
        let pick = |verdict: Verdict| {
            self.probed
                .iter()
                .zip(&self.trail)
                .filter(move |(_, r)| r.verdict == verdict)
                .map(|(i, _)| *i)
        };
        let bad = pick(Verdict::Bad).max().and_then(|i| catalog.get(i));
        let good = pick(Verdict::Good).min().and_then(|i| catalog.get(i));
        (bad, good)
    }

    pub fn probes(&self) -> usize {
        self.trail.len()
    }

    pub fn trail(&self) -> &[ProbeRecord] {
        &self.trail
    }

    /// Feed the verdict for `current()` and move to the next step.
    pub fn advance(&mut self, verdict: Verdict) -> FixResult<Step<'a>> {
        let (phase, probed) = match self.cursor {
            Cursor::Coarse { current, .. } => (Phase::Coarse, current),
            Cursor::Refine { current, .. } => (Phase::Refine, current),
            Cursor::Done { .. } => return Err(FixError::SessionFinished),
        };
        let catalog = self.catalog;
        let snap = catalog.get(probed).ok_or(FixError::EmptyCatalog)?;
        info!("search: {:?} {} -> {:?}", phase, snap, verdict);
        self.probed.push(probed);
        self.trail.push(ProbeRecord {
            snapshot: snap.id().to_string(),
            verdict,
            phase,
        });

        self.cursor = match (self.cursor, verdict) {
            (Cursor::Coarse { current, .. }, Verdict::Bad) => self.coarse_step(current),
            (Cursor::Coarse { current, lower }, Verdict::Good) => {
                Self::refine(lower, current)
            }
            (Cursor::Refine { upper, current, .. }, Verdict::Bad) => {
                Self::refine(current, upper)
            }
            (Cursor::Refine { lower, current, .. }, Verdict::Good) => {
                Self::refine(lower, current)
            }
            (Cursor::Done { .. }, _) => return Err(FixError::SessionFinished),
        };

        Ok(self.step_view())
    }

    fn step_view(&self) -> Step<'a> {
        match self.cursor {
            Cursor::Done { found } => Step::Done(self.outcome_of(found)),
            Cursor::Coarse { current, .. } | Cursor::Refine { current, .. } => {
                Step::Probe(&self.catalog.as_slice()[current])
            }
        }
    }

    fn outcome_of(&self, found: Option<usize>) -> Outcome<'a> {
        match found.and_then(|i| self.catalog.get(i)) {
            Some(s) => Outcome::Found(s),
            None => Outcome::NotFound,
        }
    }

    // Coarse BAD at `current`: jump to the earliest snapshot one step back in
    // calendar time; if that day is empty take the next older snapshot, then the
    // catalog floor, and only then give up.
    fn coarse_step(&self, current: usize) -> Cursor {
        let date = self.catalog.as_slice()[current].date();
        // step past the calendar range: nothing can be on or before the target
        let target = date.checked_sub_signed(self.step);
        let floor = self.catalog.len() - 1;

        let next = target
            .and_then(|t| {
                self.catalog
                    .earliest_on(t)
                    .or_else(|| self.catalog.newest_before(t))
            })
            .or(if floor > current { Some(floor) } else { None });

        match next {
            Some(next) => {
                debug!(
                    "search: coarse step {} -> target {:?} -> index {}",
                    date, target, next
                );
                Cursor::Coarse {
                    current: next,
                    lower: current,
                }
            }
            None => {
                info!("search: catalog exhausted, no good snapshot");
                Cursor::Done { found: None }
            }
        }
    }

    // Bisection step over (lower, upper]; the midpoint rounds toward the older end.
    fn refine(lower: usize, upper: usize) -> Cursor {
        if upper <= lower + 1 {
            return Cursor::Done { found: Some(upper) };
        }
        let mid = lower + (upper - lower + 1) / 2;
        Cursor::Refine {
            lower,
            upper,
            current: mid,
        }
    }
}

/// Run the engine to completion, asking `probe` for each candidate's verdict.
///
/// A probe error stops the search and is returned as is; the engine never turns
/// it into a BAD verdict.
pub fn drive<'a, E, F>(engine: &mut SearchEngine<'a>, mut probe: F) -> Result<Outcome<'a>, E>
where
    E: From<FixError>,
    F: FnMut(&'a Snapshot) -> Result<Verdict, E>,
{
    let mut candidate = match engine.current() {
        Some(c) => c,
        None => return engine.outcome().ok_or_else(|| E::from(FixError::SessionFinished)),
    };
    loop {
        let verdict = probe(candidate)?;
        match engine.advance(verdict)? {
            Step::Probe(next) => candidate = next,
            Step::Done(outcome) => return Ok(outcome),
        }
    }
}
