use anyhow::{Context, Result};

use tmfix::exec::{LocalRunner, SshRunner};
use tmfix::lock::try_lock_work_dir;
use tmfix::remote::ZfsRemote;
use tmfix::verify::{BundleLayout, ImageVerifier};
use tmfix::{FixerConfig, Session, SessionOptions};

/// CLI: fix: полный сеанс поиска и восстановления.
///
/// Порядок:
/// - lock на work_dir (один сеанс на рабочую копию);
/// - rollback-снапшот на NAS;
/// - coarse/refine поиск с fsck_hfs как оракулом;
/// - найденный снапшот остаётся рабочей копией, rollback-снапшот удаляется.
pub fn exec(cfg: &FixerConfig, sparsebundle: &str, json: bool) -> Result<()> {
    cfg.validate()?;
    if sparsebundle.trim().is_empty() {
        anyhow::bail!("provide a sparsebundle name");
    }
    let _lock = try_lock_work_dir(&cfg.work_dir)?;
    log::info!("fix: {} ({})", sparsebundle, cfg);

    let source = ZfsRemote::from_config(SshRunner::new(cfg.ssh_target()), cfg);
    let rollback = ZfsRemote::from_config(SshRunner::new(cfg.ssh_target()), cfg);
    let layout = BundleLayout::from_config(cfg, sparsebundle);
    let verifier = ImageVerifier::new(LocalRunner, layout).with_fsck_cache(cfg.fsck_cache.clone());

    let options = SessionOptions {
        step_days: cfg.step_days,
        verify_retries: cfg.verify_retries,
    };
    let mut session = Session::new(source, verifier, rollback, options);
    let report = session
        .run()
        .with_context(|| format!("fix {}", sparsebundle))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for (i, p) in report.probes.iter().enumerate() {
            println!(
                "probe {:>3}: {:<7} {:<5} {}",
                i + 1,
                format!("{:?}", p.phase),
                format!("{:?}", p.verdict),
                p.snapshot
            );
        }
        if !report.rejected.is_empty() {
            println!("rejected: {} identifier(s)", report.rejected.len());
        }
        match &report.found {
            Some(id) => println!("fix: OK (restored {})", id),
            None => println!("fix: no good snapshot in {} candidate(s)", report.catalog_size),
        }
    }

    report.found_or_err()?;
    Ok(())
}
