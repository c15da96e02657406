use anyhow::{Context, Result};
use serde::Serialize;

use tmfix::exec::SshRunner;
use tmfix::remote::{SnapshotSource, ZfsRemote};
use tmfix::{Catalog, FixerConfig, Snapshot};

#[derive(Serialize)]
struct Listing<'a> {
    snapshots: Vec<&'a Snapshot>,
    rejected: Vec<String>,
}

/// Список снапшотов в порядке поиска (новые первыми), опционально JSON.
pub fn exec(cfg: &FixerConfig, json: bool) -> Result<()> {
    cfg.validate()?;
    let mut remote = ZfsRemote::from_config(SshRunner::new(cfg.ssh_target()), cfg);
    let ids = remote
        .list_snapshots()
        .with_context(|| format!("list snapshots of {}", cfg.dataset))?;
    let build = Catalog::build(&ids)?;

    if json {
        let listing = Listing {
            snapshots: build.catalog.entries().collect(),
            rejected: build.rejected.iter().map(|e| e.to_string()).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    if build.catalog.is_empty() {
        println!("(no snapshots)");
    }
    for s in build.catalog.entries() {
        println!("{}  {}", s.taken_at().format("%Y-%m-%d %H:%M"), s.id());
    }
    for e in &build.rejected {
        println!("rejected: {}", e);
    }
    Ok(())
}
