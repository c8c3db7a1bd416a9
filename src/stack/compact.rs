use std::fs::{self, File};

use crate::error::{Result, StackError};
use crate::manifest;
use crate::table::{MergedView, TableWriter};

use super::lock::FileLock;
use super::{naming, names_of, reload, Stack};

impl Stack {
    /// Compacts tables `[first, last]` (inclusive, indices into the current
    /// table list) into a single replacement table, preserving the merged
    /// contents of the range exactly as a reader would see them — except
    /// that a ref deletion is dropped rather than carried forward when
    /// `first == 0`, since there is nothing below it left to shadow.
    ///
    /// Returns `Ok(false)` without doing anything if the range is already a
    /// single table, or if a concurrent writer holds the manifest lock, a
    /// table in the range is locked by another compaction, or the stack
    /// moved underneath us — all clean backoffs the caller can retry.
    /// `Err` is reserved for genuine I/O or corruption failures.
    pub fn compact_range(&self, first: usize, last: usize) -> Result<bool> {
        let snapshot = self.snapshot.load();
        if last < first || last >= snapshot.readers.len() {
            return Err(StackError::InvalidWrite(format!(
                "compact_range({first}, {last}) out of bounds for {} tables",
                snapshot.readers.len()
            )));
        }
        if first == last {
            return Ok(false);
        }

        self.stats.record_attempt();
        let _serialize = self.write_lock.lock().unwrap();

        let observed_names = names_of(&snapshot.readers);
        let mut manifest_lock = match FileLock::acquire(manifest::lock_path(&self.manifest_path)) {
            Ok(lock) => lock,
            Err(StackError::LockContention) => {
                self.stats.record_failure();
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let current_names = manifest::read_names(&self.manifest_path)?;
        if current_names != observed_names {
            let _ = manifest_lock.release();
            self.stats.record_failure();
            return Ok(false);
        }

        let range = &snapshot.readers[first..=last];
        let table_locks = match lock_tables(&self.dir, range) {
            Ok(locks) => locks,
            Err(StackError::LockContention) => {
                let _ = manifest_lock.release();
                self.stats.record_failure();
                return Ok(false);
            }
            Err(e) => {
                let _ = manifest_lock.release();
                return Err(e);
            }
        };

        let range_names: Vec<String> = range.iter().map(|r| r.name().to_string()).collect();

        let min_update_index = range[0].min_update_index();
        let max_update_index = range[range.len() - 1].max_update_index();
        let new_table_name = naming::table_file_name(min_update_index, max_update_index);
        let new_table_path = self.dir.join(&new_table_name);
        let tmp_path = self.dir.join(format!("{new_table_name}.tmp"));

        let write_result = (|| -> Result<u64> {
            let file = File::create(&tmp_path)?;
            let mut writer = TableWriter::new(file, self.config.writer.clone());
            writer.set_limits(min_update_index, max_update_index)?;

            let merged = MergedView::new(range);
            for record in merged.seek_ref("") {
                if record.is_deletion() && first == 0 {
                    continue;
                }
                writer.add_ref(record)?;
            }
            for record in merged.seek_log("", u64::MAX) {
                writer.add_log(record)?;
            }
            writer.close()?;
            fs::rename(&tmp_path, &new_table_path)?;
            Ok(new_table_path.metadata().map(|m| m.len()).unwrap_or(0))
        })();

        // Release the manifest lock (keeping the per-table locks, which
        // still block a concurrent compaction from touching this range) so
        // other writers can keep adding while the merge above runs.
        let _ = manifest_lock.release();

        let bytes = match write_result {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };
        self.stats.add_bytes(bytes);

        let mut manifest_lock = match FileLock::acquire(manifest::lock_path(&self.manifest_path)) {
            Ok(lock) => lock,
            Err(StackError::LockContention) => {
                let _ = fs::remove_file(&new_table_path);
                self.stats.record_failure();
                return Ok(false);
            }
            Err(e) => {
                let _ = fs::remove_file(&new_table_path);
                return Err(e);
            }
        };

        // Tables are only ever appended at the tail, so our range can only
        // have new names appended after it while we didn't hold the lock;
        // find it again by name rather than trusting the old indices.
        let fresh_names = manifest::read_names(&self.manifest_path)?;
        let start = match fresh_names.windows(range_names.len()).position(|w| w == range_names.as_slice()) {
            Some(pos) => pos,
            None => {
                let _ = manifest_lock.release();
                let _ = fs::remove_file(&new_table_path);
                self.stats.record_failure();
                return Ok(false);
            }
        };
        let end = start + range_names.len();

        let mut new_names = fresh_names[..start].to_vec();
        new_names.push(new_table_name);
        new_names.extend_from_slice(&fresh_names[end..]);

        if let Err(e) = manifest_lock.write_all(manifest::encode_names(&new_names).as_bytes()) {
            let _ = fs::remove_file(&new_table_path);
            return Err(e.into());
        }
        if let Err(e) = manifest_lock.rename_onto(&self.manifest_path) {
            let _ = fs::remove_file(&new_table_path);
            return Err(e.into());
        }
        log::info!(
            "compacted tables {first}..={last} (update indices {min_update_index}..={max_update_index}) into one table"
        );

        for (name, lock) in range.iter().zip(table_locks) {
            let path = self.dir.join(name.name());
            let _ = fs::remove_file(&path);
            let _ = lock.release();
        }

        let readers = reload::reload(
            &self.dir,
            &self.manifest_path,
            Vec::new(),
            self.config.reload_deadline,
            self.config.backoff_base,
        )?;
        self.install(readers);
        Ok(true)
    }
}

fn lock_tables(dir: &std::path::Path, range: &[crate::table::TableReader]) -> Result<Vec<FileLock>> {
    let mut locks = Vec::with_capacity(range.len());
    for reader in range {
        let lock_path = dir.join(format!("{}.lock", reader.name()));
        match FileLock::acquire(lock_path) {
            Ok(lock) => locks.push(lock),
            Err(e) => {
                log::debug!("table lock for {} is held by another compaction", reader.name());
                // Unwind anything we already grabbed; their Drop impls
                // remove the lock files.
                drop(locks);
                return Err(e);
            }
        }
    }
    Ok(locks)
}
