use anyhow::{anyhow, Result};
use std::path::Path;

use tmfix::exec::LocalRunner;
use tmfix::verify::{BundleLayout, ImageVerifier};
use tmfix::{FixerConfig, Verdict};

/// CLI: check: attach + fsck_hfs локального sparsebundle без синхронизации.
pub fn exec(cfg: &FixerConfig, path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow!("{} does not exist", path.display()));
    }
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("bad bundle path {}", path.display()))?;
    let mut layout = BundleLayout::from_config(cfg, name);
    if let Some(parent) = path.parent() {
        layout.work_dir = parent.to_path_buf();
    }

    let verifier = ImageVerifier::new(LocalRunner, layout).with_fsck_cache(cfg.fsck_cache.clone());
    match verifier.check_bundle(path)? {
        Verdict::Good => {
            println!("check: GOOD ({})", path.display());
            Ok(())
        }
        Verdict::Bad => Err(anyhow!("check: BAD ({})", path.display())),
    }
}
