use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use super::record::{LogRecord, RefRecord};
use super::reader::TableReader;

/// A view over an ordered stack of tables that resolves overlapping ranges
/// the way a single table would: `seek_ref` returns at most one record per
/// name, taken from the newest table that contains it; `seek_log` returns
/// every matching log entry, since distinct tables never share an
/// update index and therefore never produce duplicate log entries.
///
/// `readers` must be ordered oldest-first, the same order the stack's
/// manifest lists them in.
pub struct MergedView<'a> {
    readers: &'a [TableReader],
}

impl<'a> MergedView<'a> {
    pub fn new(readers: &'a [TableReader]) -> Self {
        Self { readers }
    }

    pub fn seek_ref(&self, prefix: &str) -> impl Iterator<Item = RefRecord> + 'a {
        // Feed sources newest-first so the generic merge's "first source wins
        // a tie" rule keeps the newest table's record, per the shadowing
        // rule above.
        let sources: Vec<_> = self
            .readers
            .iter()
            .rev()
            .map(|r| {
                let it: Box<dyn Iterator<Item = RefRecord> + 'a> =
                    Box::new(r.seek_ref(prefix).cloned());
                it
            })
            .collect();
        merge_by_key(sources, |r| r.ref_name.clone(), true)
    }

    pub fn seek_log(&self, prefix: &str, max_update_index: u64) -> impl Iterator<Item = LogRecord> + 'a {
        let sources: Vec<_> = self
            .readers
            .iter()
            .rev()
            .map(|r| {
                let it: Box<dyn Iterator<Item = LogRecord> + 'a> =
                    Box::new(r.seek_log(prefix, max_update_index).cloned());
                it
            })
            .collect();
        merge_by_key(sources, |r| (r.ref_name.clone(), Reverse(r.update_index)), false)
    }
}

struct HeapItem<K, T> {
    key: K,
    source: usize,
    item: T,
}

impl<K: PartialEq, T> PartialEq for HeapItem<K, T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}
impl<K: Eq, T> Eq for HeapItem<K, T> {}

impl<K: Ord, T> PartialOrd for HeapItem<K, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord, T> Ord for HeapItem<K, T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key).then(self.source.cmp(&other.source))
    }
}

/// K-way merges already-sorted `sources` by a projected key. When `dedup` is
/// set, only the lowest-`source`-index item for a given key survives; the
/// caller arranges source priority (e.g. newest-first) to get the desired
/// shadowing behavior. Generalizes the single-`Ord`-bound merge used to
/// combine a memtable with on-disk segments into one that merges arbitrary
/// record types by an arbitrary projected key.
fn merge_by_key<'a, T: 'a, K: Ord + Clone + 'a>(
    mut sources: Vec<Box<dyn Iterator<Item = T> + 'a>>,
    key_fn: impl Fn(&T) -> K + 'a,
    dedup: bool,
) -> impl Iterator<Item = T> + 'a {
    let mut heap = BinaryHeap::new();
    for (idx, source) in sources.iter_mut().enumerate() {
        if let Some(item) = source.next() {
            let key = key_fn(&item);
            heap.push(Reverse(HeapItem { key, source: idx, item }));
        }
    }

    let mut last_key: Option<K> = None;
    std::iter::from_fn(move || loop {
        let Reverse(HeapItem { key, source, item }) = heap.pop()?;
        if let Some(next) = sources[source].next() {
            let next_key = key_fn(&next);
            heap.push(Reverse(HeapItem { key: next_key, source, item: next }));
        }

        if dedup && last_key.as_ref() == Some(&key) {
            continue;
        }
        last_key = Some(key);
        return Some(item);
    })
}
