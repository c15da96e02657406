// Ядро поиска
pub mod error;
pub mod snapshot;
pub mod catalog;
pub mod search;

// Внешние инструменты (ssh/zfs/rsync/hdiutil/fsck_hfs)
pub mod exec;
pub mod remote;
pub mod verify;

// Сеанс, конфиг, служебное
pub mod session;
pub mod config;
pub mod lock;
pub mod metrics;

// Удобные реэкспорты
pub use catalog::{Catalog, CatalogBuild};
pub use config::FixerConfig;
pub use error::{FixError, FixResult};
pub use search::{drive, Outcome, Phase, ProbeRecord, SearchEngine, Step, Verdict};
pub use session::{Session, SessionOptions, SessionReport};
pub use snapshot::Snapshot;
