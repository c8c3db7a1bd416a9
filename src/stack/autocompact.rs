use crate::error::Result;

use super::Stack;

fn log2_floor(size: u64) -> u32 {
    if size == 0 {
        0
    } else {
        63 - size.leading_zeros()
    }
}

/// Groups table sizes into contiguous runs: a run absorbs the next table as
/// long as that table's `log2` bucket doesn't exceed the run's own, so one
/// oversized table starts a fresh run rather than dragging everything after
/// it into the same bucket.
fn segments(sizes: &[u64]) -> Vec<(usize, usize, u32)> {
    let logs: Vec<u32> = sizes.iter().map(|&s| log2_floor(s)).collect();
    let mut out = Vec::new();
    let n = logs.len();
    let mut i = 0;
    while i < n {
        let mut max_log = logs[i];
        let mut j = i + 1;
        while j < n && logs[j] <= max_log {
            max_log = max_log.max(logs[j]);
            j += 1;
        }
        out.push((i, j - 1, max_log));
        i = j;
    }
    out
}

/// Picks the run with at least two tables and the smallest bucket, then
/// extends it leftward over any smaller-or-equal neighbor so a compaction
/// never leaves a tiny table stranded next to the table it would have been
/// folded into.
fn suggest_compaction(sizes: &[u64]) -> Option<(usize, usize)> {
    let best = segments(sizes)
        .into_iter()
        .filter(|(first, last, _)| last > first)
        .min_by_key(|&(_, _, log)| log)?;

    let (mut first, last, _) = best;
    while first > 0 && sizes[first - 1] <= sizes[first] {
        first -= 1;
    }
    Some((first, last))
}

impl Stack {
    /// Runs one round of size-tiered compaction, compacting the smallest
    /// run of similarly-sized tables that needs it. Returns `Ok(false)` if
    /// the stack is already well-tiered.
    pub fn auto_compact(&self) -> Result<bool> {
        let overhead = self.config.table_framing_overhead;
        let sizes: Vec<u64> =
            self.snapshot.load().readers.iter().map(|r| r.size().saturating_sub(overhead)).collect();
        match suggest_compaction(&sizes) {
            Some((first, last)) => self.compact_range(first, last),
            None => Ok(false),
        }
    }

    /// Compacts every table in the stack into one. Returns `Ok(false)` if
    /// the stack already has at most one table.
    pub fn compact_all(&self) -> Result<bool> {
        let count = self.table_count();
        if count <= 1 {
            return Ok(false);
        }
        self.compact_range(0, count - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_group_by_log_bucket() {
        // sizes 2,2,4,2,8 -> logs 1,1,2,1,3
        let segs = segments(&[2, 2, 4, 2, 8]);
        assert_eq!(segs, vec![(0, 1, 1), (2, 3, 2), (4, 4, 3)]);
    }

    #[test]
    fn suggests_smallest_multi_table_run() {
        assert_eq!(suggest_compaction(&[2, 2, 4, 2, 8]), Some((0, 1)));
    }

    #[test]
    fn left_extends_over_smaller_neighbors() {
        // sizes 1,2,2 -> logs 0,1,1; run (1,2) at log 1 left-extends over the
        // size-1 table at index 0.
        assert_eq!(suggest_compaction(&[1, 2, 2]), Some((0, 2)));
    }

    #[test]
    fn no_suggestion_when_already_tiered() {
        assert_eq!(suggest_compaction(&[1, 2, 4, 8]), None);
    }
}
