//! Snapshot value type and identifier parsing.
//!
//! Identifier shapes (ZFS auto-snapshot naming):
//!   auto-20160827.0003-2m
//!   tank/backups/tm@auto-20160827.0003-2m
//! Everything up to the last '@' is the dataset and is ignored for parsing;
//! the full string stays the identifier.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

use crate::error::{FixError, FixResult};

/// Layout of the stamp between the first and second '-'.
pub const STAMP_FORMAT: &str = "%Y%m%d.%H%M";

/// Immutable point-in-time copy of the backup dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Snapshot {
    id: String,
    taken_at: NaiveDateTime,
}

impl Snapshot {
    pub fn parse(id: &str) -> FixResult<Self> {
        let malformed = |reason: &str| FixError::MalformedIdentifier {
            id: id.to_string(),
            reason: reason.to_string(),
        };

        let name = match id.rfind('@') {
            Some(pos) => &id[pos + 1..],
            None => id,
        };

        let mut parts = name.splitn(3, '-');
        let prefix = parts.next().unwrap_or_default();
        if prefix.is_empty() {
            return Err(malformed("missing prefix before '-'"));
        }
        let stamp = parts
            .next()
            .ok_or_else(|| malformed("missing YYYYMMDD.HHMM stamp"))?;
        // strict length: "%Y" would otherwise accept 5+ digit years
        if stamp.len() != 13 {
            return Err(malformed("stamp must look like YYYYMMDD.HHMM"));
        }
        let taken_at = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
            .map_err(|e| malformed(&format!("bad stamp '{}': {}", stamp, e)))?;

        Ok(Self {
            id: id.to_string(),
            taken_at,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn taken_at(&self) -> NaiveDateTime {
        self.taken_at
    }

    pub fn date(&self) -> NaiveDate {
        self.taken_at.date()
    }

    /// Snapshot name without the dataset part (`auto-...`).
    pub fn short_name(&self) -> &str {
        match self.id.rfind('@') {
            Some(pos) => &self.id[pos + 1..],
            None => &self.id,
        }
    }

    /// Catalog order: newest first, ties by identifier ascending.
    pub fn newest_first(a: &Snapshot, b: &Snapshot) -> Ordering {
        b.taken_at.cmp(&a.taken_at).then_with(|| a.id.cmp(&b.id))
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.taken_at.format("%Y-%m-%d %H:%M"))
    }
}
