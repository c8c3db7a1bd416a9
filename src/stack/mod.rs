mod add;
mod autocompact;
mod compact;
mod lock;
mod naming;
mod reload;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use arc_swap::ArcSwap;
use portable_atomic::AtomicU64;

use crate::config::StackConfig;
use crate::error::Result;
use crate::table::{LogRecord, MergedView, RefRecord, TableReader};

/// Running counters for a [`Stack`]: bytes written by compaction and add,
/// and how often those operations were attempted versus lost to contention.
#[derive(Default)]
pub struct StackStats {
    bytes: AtomicU64,
    attempts: AtomicU64,
    failures: AtomicU64,
}

impl StackStats {
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    fn add_bytes(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }
}

struct Snapshot {
    readers: Vec<TableReader>,
}

fn names_of(readers: &[TableReader]) -> Vec<String> {
    readers.iter().map(|r| r.name().to_string()).collect()
}

fn next_update_index(readers: &[TableReader]) -> u64 {
    readers.last().map(|r| r.max_update_index() + 1).unwrap_or(0)
}

/// A reftable stack: an append-only, self-compacting log of immutable table
/// files, with a single current manifest naming the tables that make it up
/// in oldest-to-newest order. Reads never block on writes; writes are
/// serialized across processes by an exclusive-create lock file next to the
/// manifest.
pub struct Stack {
    dir: PathBuf,
    manifest_path: PathBuf,
    config: StackConfig,
    snapshot: ArcSwap<Snapshot>,
    write_lock: Mutex<()>,
    stats: StackStats,
}

impl Stack {
    /// Opens (creating if absent) the reftable stack rooted at `dir`, whose
    /// manifest lives at `manifest_path`.
    pub fn open(dir: impl Into<PathBuf>, manifest_path: impl Into<PathBuf>, config: StackConfig) -> Result<Self> {
        let dir = dir.into();
        let manifest_path = manifest_path.into();
        fs::create_dir_all(&dir)?;

        let readers = reload::reload(&dir, &manifest_path, Vec::new(), config.reload_deadline, config.backoff_base)?;

        Ok(Self {
            dir,
            manifest_path,
            config,
            snapshot: ArcSwap::new(std::sync::Arc::new(Snapshot { readers })),
            write_lock: Mutex::new(()),
            stats: StackStats::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn stats(&self) -> &StackStats {
        &self.stats
    }

    /// The update index the next `add` will use.
    pub fn next_update_index(&self) -> u64 {
        next_update_index(&self.snapshot.load().readers)
    }

    /// Number of tables currently in the stack.
    pub fn table_count(&self) -> usize {
        self.snapshot.load().readers.len()
    }

    /// Re-reads the manifest and opens any tables this process hasn't seen
    /// yet, picking up writes published by other processes. `add` and
    /// `compact_range` call this automatically after publishing, so this is
    /// only needed to observe concurrent external writers.
    pub fn reload(&self) -> Result<()> {
        let readers = reload::reload(
            &self.dir,
            &self.manifest_path,
            Vec::new(),
            self.config.reload_deadline,
            self.config.backoff_base,
        )?;
        self.install(readers);
        Ok(())
    }

    fn install(&self, readers: Vec<TableReader>) {
        self.snapshot.store(std::sync::Arc::new(Snapshot { readers }));
    }

    /// Resolves `ref_name`, or any ref starting with `prefix` if broader
    /// iteration is desired, to the record from the newest table that names
    /// it; tables deeper in the stack are shadowed.
    pub fn seek_ref(&self, prefix: &str) -> Vec<RefRecord> {
        let snapshot = self.snapshot.load();
        MergedView::new(&snapshot.readers).seek_ref(prefix).collect()
    }

    /// Returns every log record across the stack with name >= `prefix` and
    /// `update_index <= max_update_index`, newest entry per ref first.
    pub fn seek_log(&self, prefix: &str, max_update_index: u64) -> Vec<LogRecord> {
        let snapshot = self.snapshot.load();
        MergedView::new(&snapshot.readers).seek_log(prefix, max_update_index).collect()
    }
}
