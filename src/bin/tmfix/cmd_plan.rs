use anyhow::{Context, Result};
use serde::Serialize;

use tmfix::exec::SshRunner;
use tmfix::remote::{SnapshotSource, ZfsRemote};
use tmfix::{drive, Catalog, FixError, FixerConfig, Outcome, ProbeRecord, SearchEngine, Snapshot, Verdict};

#[derive(Serialize)]
struct Plan<'a> {
    good_from: Option<&'a str>,
    probes: &'a [ProbeRecord],
    found: Option<&'a str>,
}

/// Сухой прогон: порядок проб на живом каталоге с модельным оракулом.
pub fn exec(cfg: &FixerConfig, good_from: Option<&str>, json: bool) -> Result<()> {
    cfg.validate()?;
    let mut remote = ZfsRemote::from_config(SshRunner::new(cfg.ssh_target()), cfg);
    let ids = remote
        .list_snapshots()
        .with_context(|| format!("list snapshots of {}", cfg.dataset))?;
    let catalog = Catalog::build(&ids)?.catalog;

    // cutoff can name a catalog entry or just carry a stamp
    let cutoff = match good_from {
        Some(id) => {
            let snap = match catalog.position(id).and_then(|i| catalog.get(i)) {
                Some(s) => s.clone(),
                None => Snapshot::parse(id)?,
            };
            Some(snap.taken_at())
        }
        None => None,
    };

    let mut engine = SearchEngine::with_step_days(&catalog, cfg.step_days)?;
    let outcome = drive(&mut engine, |s: &Snapshot| -> Result<Verdict, FixError> {
        Ok(match cutoff {
            Some(t) if s.taken_at() <= t => Verdict::Good,
            _ => Verdict::Bad,
        })
    })?;
    let found = match outcome {
        Outcome::Found(s) => Some(s.id()),
        Outcome::NotFound => None,
    };

    if json {
        let plan = Plan {
            good_from,
            probes: engine.trail(),
            found,
        };
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    for (i, p) in engine.trail().iter().enumerate() {
        println!(
            "probe {:>3}: {:<7} {:<5} {}",
            i + 1,
            format!("{:?}", p.phase),
            format!("{:?}", p.verdict),
            p.snapshot
        );
    }
    println!("plan: {} probe(s), result: {}", engine.probes(), found.unwrap_or("not found"));
    Ok(())
}
