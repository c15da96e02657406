// tests/image_verifier.rs
//
// Запуск только этого файла:
//   cargo test --test image_verifier -- --nocapture
//
// Покрываем:
// 1) Порядок команд одной пробы: rsync → chflags → hdiutil attach → fsck_hfs → hdiutil detach.
// 2) Вердикты fsck_hfs: чисто / починено вторым проходом / BAD / сигнал (ошибка).
// 3) Ошибки rsync/attach: это ошибки проверки, а не BAD.
// 4) promote: повторный sync только если в рабочей копии другой снапшот; снятие
//    RecoveryBackupDeclinedDate из plist с бэкапом.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use tmfix::exec::{CommandOutput, CommandRunner, SshTarget};
use tmfix::verify::{BundleLayout, ImageVerifier, Verifier, DECLINED_DATE_KEY, MACHINE_ID_PLIST};
use tmfix::{FixerConfig, Snapshot, Verdict};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let base = std::env::temp_dir();
    base.join(format!("tmfix-verify-{prefix}-{pid}-{t}-{id}"))
}

const ATTACH_OUT: &str = "\
/dev/disk4          \tGUID_partition_scheme          \t
/dev/disk4s1        \tEFI                            \t
/dev/disk4s2        \tApple_HFS                      \t
";

/// Per-program reply queues; a drained queue answers exit 0.
#[derive(Default)]
struct FakeRunner {
    calls: RefCell<Vec<(String, Vec<String>)>>,
    replies: RefCell<HashMap<String, VecDeque<CommandOutput>>>,
}

impl FakeRunner {
    fn script(self, program: &str, out: CommandOutput) -> Self {
        self.replies
            .borrow_mut()
            .entry(program.to_string())
            .or_default()
            .push_back(out);
        self
    }

    fn programs(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|(p, _)| p.clone()).collect()
    }

    fn args_of(&self, program: &str) -> Vec<Vec<String>> {
        self.calls
            .borrow()
            .iter()
            .filter(|(p, _)| p == program)
            .map(|(_, a)| a.clone())
            .collect()
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        self.calls
            .borrow_mut()
            .push((program.to_string(), args.to_vec()));
        let next = self
            .replies
            .borrow_mut()
            .get_mut(program)
            .and_then(|q| q.pop_front());
        Ok(next.unwrap_or_else(|| CommandOutput::ok("")))
    }
}

fn layout(work_dir: PathBuf) -> BundleLayout {
    BundleLayout {
        remote: SshTarget::new("nas"),
        mountpoint: "/mnt/tank/tm".to_string(),
        bundle: "MyMac".to_string(),
        work_dir,
    }
}

fn snap(id: &str) -> Snapshot {
    Snapshot::parse(id).unwrap()
}

fn signal() -> CommandOutput {
    CommandOutput {
        code: None,
        stdout: String::new(),
        stderr: String::new(),
    }
}

#[test]
fn clean_check_is_good() -> Result<()> {
    let root = unique_root("clean");
    let runner = FakeRunner::default().script("hdiutil", CommandOutput::ok(ATTACH_OUT));
    let mut v = ImageVerifier::new(&runner, layout(root.clone()));

    let s = snap("tank/tm@auto-20160827.0003-2m");
    assert_eq!(v.verify(&s)?, Verdict::Good);
    assert_eq!(v.staged(), Some(s.id()));

    assert_eq!(
        runner.programs(),
        vec!["rsync", "chflags", "hdiutil", "fsck_hfs", "hdiutil"]
    );
    let rsync = &runner.args_of("rsync")[0];
    assert_eq!(&rsync[..3], &["-a", "--delete", "--inplace"]);
    assert_eq!(
        rsync[3],
        "nas:/mnt/tank/tm/.zfs/snapshot/auto-20160827.0003-2m/MyMac.sparsebundle/"
    );
    assert_eq!(rsync[4], format!("{}/", root.join("MyMac.sparsebundle").display()));

    let hdiutil = runner.args_of("hdiutil");
    assert_eq!(&hdiutil[0][..4], &["attach", "-nomount", "-noverify", "-noautofsck"]);
    assert_eq!(hdiutil[1], vec!["detach", "/dev/disk4s2"]);
    assert_eq!(runner.args_of("fsck_hfs")[0], vec!["-dfry", "-c", "1g", "/dev/disk4s2"]);

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn repaired_image_is_good() -> Result<()> {
    let root = unique_root("repaired");
    let runner = FakeRunner::default()
        .script("hdiutil", CommandOutput::ok(ATTACH_OUT))
        .script("fsck_hfs", CommandOutput::failed(8, "invalid node structure"))
        .script("fsck_hfs", CommandOutput::ok(""))
        .script("fsck_hfs", CommandOutput::ok(""));
    let mut v = ImageVerifier::new(&runner, layout(root.clone())).with_fsck_cache("512m");

    assert_eq!(v.verify(&snap("auto-20160827.0003-2m"))?, Verdict::Good);
    let fsck = runner.args_of("fsck_hfs");
    assert_eq!(fsck.len(), 3);
    assert_eq!(fsck[0][..3], ["-dfry", "-c", "512m"]);
    assert_eq!(fsck[1], vec!["-p", "/dev/disk4s2"]);

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn unrepairable_image_is_bad() -> Result<()> {
    let root = unique_root("bad");
    let runner = FakeRunner::default()
        .script("hdiutil", CommandOutput::ok(ATTACH_OUT))
        .script("fsck_hfs", CommandOutput::failed(8, "invalid node structure"))
        .script("fsck_hfs", CommandOutput::failed(8, ""))
        .script("fsck_hfs", CommandOutput::failed(8, "still broken"));
    let mut v = ImageVerifier::new(&runner, layout(root.clone()));

    assert_eq!(v.verify(&snap("auto-20160827.0003-2m"))?, Verdict::Bad);
    // detach runs after a BAD verdict as well
    assert_eq!(runner.programs().last().map(String::as_str), Some("hdiutil"));

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn killed_check_is_an_error_and_still_detaches() {
    let root = unique_root("signal");
    let runner = FakeRunner::default()
        .script("hdiutil", CommandOutput::ok(ATTACH_OUT))
        .script("fsck_hfs", signal());
    let mut v = ImageVerifier::new(&runner, layout(root.clone()));

    let err = v.verify(&snap("auto-20160827.0003-2m")).unwrap_err();
    assert!(format!("{:#}", err).contains("signal"), "{:#}", err);
    assert_eq!(runner.args_of("hdiutil").len(), 2);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn sync_failure_is_an_error() {
    let root = unique_root("rsync");
    let runner = FakeRunner::default()
        .script("rsync", CommandOutput::failed(23, "some files could not be transferred"));
    let mut v = ImageVerifier::new(&runner, layout(root.clone()));

    let err = v.verify(&snap("auto-20160827.0003-2m")).unwrap_err();
    assert!(format!("{:#}", err).contains("rsync failed (exit 23)"), "{:#}", err);
    assert_eq!(runner.programs(), vec!["rsync"]);
    assert_eq!(v.staged(), None);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn attach_failure_is_an_error() {
    let root = unique_root("attach");
    let runner = FakeRunner::default()
        .script("hdiutil", CommandOutput::failed(1, "hdiutil: attach failed - Resource busy"));
    let mut v = ImageVerifier::new(&runner, layout(root.clone()));

    let err = v.verify(&snap("auto-20160827.0003-2m")).unwrap_err();
    assert!(format!("{:#}", err).contains("Resource busy"), "{:#}", err);
    assert!(runner.args_of("fsck_hfs").is_empty());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn attach_without_hfs_device_still_detaches() {
    let root = unique_root("nohfs");
    let runner = FakeRunner::default().script(
        "hdiutil",
        CommandOutput::ok("/dev/disk5 GUID_partition_scheme\n/dev/disk5s1 EFI Apple_APFS\n"),
    );
    let mut v = ImageVerifier::new(&runner, layout(root.clone()));

    let err = v.verify(&snap("auto-20160827.0003-2m")).unwrap_err();
    assert!(format!("{:#}", err).contains("no HFS device"), "{:#}", err);
    assert!(runner.args_of("fsck_hfs").is_empty());

    let hdiutil = runner.args_of("hdiutil");
    assert_eq!(hdiutil.len(), 2);
    assert_eq!(hdiutil[1], vec!["detach", "/dev/disk5"]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn chflags_failure_is_only_a_warning() -> Result<()> {
    let root = unique_root("chflags");
    let runner = FakeRunner::default()
        .script("chflags", CommandOutput::failed(1, "Operation not permitted"))
        .script("hdiutil", CommandOutput::ok(ATTACH_OUT));
    let mut v = ImageVerifier::new(&runner, layout(root.clone()));
    assert_eq!(v.verify(&snap("auto-20160827.0003-2m"))?, Verdict::Good);

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn promote_resyncs_only_when_needed_and_clears_marker() -> Result<()> {
    let root = unique_root("promote");
    let runner = FakeRunner::default().script("hdiutil", CommandOutput::ok(ATTACH_OUT));
    let mut v = ImageVerifier::new(&runner, layout(root.clone()));

    let good = snap("auto-20160823.1003-2m");
    let bad = snap("auto-20160825.1003-2m");

    v.verify(&good)?;
    let plist = root.join("MyMac.sparsebundle").join(MACHINE_ID_PLIST);
    let text = format!(
        "<dict>\n\t{}\n\t<date>2016-09-01T10:00:00Z</date>\n</dict>\n",
        DECLINED_DATE_KEY
    );
    fs::write(&plist, &text)?;

    // last probe left the good snapshot in place: no extra sync
    v.promote(&good)?;
    assert_eq!(runner.args_of("rsync").len(), 1);

    let cleared = fs::read_to_string(&plist)?;
    assert!(!cleared.contains(DECLINED_DATE_KEY));
    let backup = root.join("MyMac.sparsebundle").join(format!("{MACHINE_ID_PLIST}.bck"));
    assert_eq!(fs::read_to_string(&backup)?, text);

    // working copy now holds another snapshot: promote syncs back
    v.verify(&bad)?;
    v.promote(&good)?;
    let rsync = runner.args_of("rsync");
    assert_eq!(rsync.len(), 3);
    assert!(rsync[2][3].contains("/auto-20160823.1003-2m/"));
    assert_eq!(v.staged(), Some(good.id()));

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn marker_absent_is_not_an_error() -> Result<()> {
    let root = unique_root("nomarker");
    let runner = FakeRunner::default();
    let v = ImageVerifier::new(&runner, layout(root.clone()));
    assert!(!v.clear_declined_marker()?);

    fs::create_dir_all(root.join("MyMac.sparsebundle"))?;
    fs::write(root.join("MyMac.sparsebundle").join(MACHINE_ID_PLIST), "<dict></dict>")?;
    assert!(!v.clear_declined_marker()?);

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn layout_from_config() -> Result<()> {
    let cfg = FixerConfig::from_toml_str(
        r#"
        host = "nas"
        ssh_user = "backup"
        dataset = "tank/tm"
        dataset_mountpoint = "/volumes/tm/"
        work_dir = "/tmp/tm"
        "#,
    )?;
    let l = BundleLayout::from_config(&cfg, "MyMac.sparsebundle");
    assert_eq!(l.bundle, "MyMac");
    assert_eq!(l.local_bundle(), PathBuf::from("/tmp/tm/MyMac.sparsebundle"));
    assert_eq!(
        l.remote_source(&snap("tank/tm@auto-20160827.0003-2m")),
        "backup@nas:/volumes/tm/.zfs/snapshot/auto-20160827.0003-2m/MyMac.sparsebundle/"
    );
    Ok(())
}
