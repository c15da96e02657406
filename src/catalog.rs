//! Snapshot catalog: time-ordered, immutable view over a flat identifier list.
//!
//! Order: newest first; equal timestamps are ordered by identifier ascending.
//! Index 0 is always the newest snapshot, `len() - 1` the catalog floor.

use chrono::NaiveDate;
use log::{debug, warn};
use std::collections::BTreeSet;

use crate::error::{FixError, FixResult};
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<Snapshot>,
}

/// Result of `Catalog::build`: the parsed catalog plus every rejected entry.
#[derive(Debug, Clone)]
pub struct CatalogBuild {
    pub catalog: Catalog,
    /// One `FixError::MalformedIdentifier` per entry that could not be parsed.
    pub rejected: Vec<FixError>,
}

impl Catalog {
    /// Parse identifiers into a catalog.
    ///
    /// Malformed entries are reported in `rejected`, never dropped silently.
    /// Fails only when the input is non-empty and nothing parses.
    pub fn build<I, S>(identifiers: I) -> FixResult<CatalogBuild>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        // set semantics: duplicates collapse, input order is irrelevant
        let unique: BTreeSet<String> = identifiers
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();

        let mut entries = Vec::with_capacity(unique.len());
        let mut rejected = Vec::new();
        for id in &unique {
            match Snapshot::parse(id) {
                Ok(s) => entries.push(s),
                Err(e) => {
                    warn!("catalog: skipping entry: {}", e);
                    rejected.push(e);
                }
            }
        }

        if entries.is_empty() && !rejected.is_empty() {
            return Err(FixError::AllMalformed {
                count: rejected.len(),
            });
        }

        let catalog = Self::from_snapshots(entries);
        debug!(
            "catalog: {} snapshot(s), {} rejected",
            catalog.len(),
            rejected.len()
        );
        Ok(CatalogBuild { catalog, rejected })
    }

    pub fn from_snapshots(mut entries: Vec<Snapshot>) -> Self {
        entries.sort_by(Snapshot::newest_first);
        entries.dedup_by(|a, b| a.id() == b.id());
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn newest(&self) -> FixResult<&Snapshot> {
        self.entries.first().ok_or(FixError::EmptyCatalog)
    }

    pub fn oldest(&self) -> FixResult<&Snapshot> {
        self.entries.last().ok_or(FixError::EmptyCatalog)
    }

    /// Fresh newest-first traversal.
    pub fn entries(&self) -> impl Iterator<Item = &Snapshot> + '_ {
        self.entries.iter()
    }

    pub(crate) fn as_slice(&self) -> &[Snapshot] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        self.entries.get(index)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|s| s.id() == id)
    }

    /// (oldest, newest), or None for an empty catalog.
    pub fn span(&self) -> Option<(&Snapshot, &Snapshot)> {
        Some((self.entries.last()?, self.entries.first()?))
    }

    /// Earliest snapshot issued on `date`.
    ///
    /// With `or_earlier = false` a day without snapshots yields `None`.
    /// With `or_earlier = true` it falls back to the newest snapshot strictly
    /// older than `date`.
    pub fn find_before(&self, date: NaiveDate, or_earlier: bool) -> Option<&Snapshot> {
        let idx = match self.earliest_on(date) {
            Some(i) => Some(i),
            None if or_earlier => self.newest_before(date),
            None => None,
        };
        idx.map(|i| &self.entries[i])
    }

    /// Index of the earliest snapshot on `date`. Within one timestamp the
    /// smallest identifier wins, which is the first of the equal run.
    pub(crate) fn earliest_on(&self, date: NaiveDate) -> Option<usize> {
        let mut found: Option<usize> = None;
        for (i, s) in self.entries.iter().enumerate() {
            let d = s.date();
            if d < date {
                break;
            }
            if d == date {
                let better = match found {
                    None => true,
                    Some(j) => s.taken_at() < self.entries[j].taken_at(),
                };
                if better {
                    found = Some(i);
                }
            }
        }
        found
    }

    /// Index of the newest snapshot whose calendar date is strictly before `date`.
    pub(crate) fn newest_before(&self, date: NaiveDate) -> Option<usize> {
        self.entries.iter().position(|s| s.date() < date)
    }
}
