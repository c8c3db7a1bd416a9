use std::time::Duration;

/// Tunables for a [`crate::Stack`].
///
/// Defaults match the reload/back-off behavior exercised by the test suite;
/// callers embedding the stack in a long-running service will usually want to
/// widen `reload_deadline` to ride out slower filesystems.
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Wall-clock budget for [`crate::Stack::reload`] to converge on a stable
    /// manifest in the presence of a racing external compaction.
    pub reload_deadline: Duration,
    /// Base sleep between reload retries; doubled each attempt and jittered.
    pub backoff_base: Duration,
    /// Writer tunables threaded through every table this stack produces.
    pub writer: TableWriterConfig,
    /// Fixed per-table framing overhead (header + footer) subtracted from a
    /// table's file size before it's weighed for auto-compaction, so two
    /// tables holding the same records land in the same size tier regardless
    /// of how much of their file is bookkeeping rather than payload.
    pub table_framing_overhead: u64,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            reload_deadline: Duration::from_millis(2500),
            backoff_base: Duration::from_millis(1),
            writer: TableWriterConfig::default(),
            table_framing_overhead: 91,
        }
    }
}

/// Tunables for [`crate::TableWriter`].
#[derive(Debug, Clone)]
pub struct TableWriterConfig {
    /// Reserved for future block-level chunking; the current writer streams
    /// records eagerly and does not yet split tables into pages.
    pub block_size: usize,
}

impl Default for TableWriterConfig {
    fn default() -> Self {
        Self { block_size: 4096 }
    }
}
