use std::fs::{self, File};

use crate::error::{Result, StackError};
use crate::manifest;
use crate::table::TableWriter;

use super::lock::FileLock;
use super::{naming, next_update_index, names_of, reload, Stack};

impl Stack {
    /// Runs a single transactional update against the stack.
    ///
    /// `write` is handed a fresh [`TableWriter`] and the update index it
    /// must use; it should call `set_limits(next, next)` and then add
    /// whatever ref and log records the update consists of. Returning
    /// without adding any records (and without calling `set_limits`) is
    /// treated as a no-op: nothing is published and `add` returns `Ok(false)`.
    ///
    /// Returns `Err(StackError::LockContention)` if another writer holds the
    /// manifest lock, or if the stack changed between this call observing
    /// its current state and acquiring the lock — in both cases the caller
    /// is expected to retry.
    pub fn add(&self, write: impl FnOnce(&mut TableWriter<File>, u64) -> Result<()>) -> Result<bool> {
        let result = self.add_once(write);
        if matches!(result, Err(StackError::LockContention)) {
            // A lost race means our view of the stack is stale; give the
            // caller's retry a fresh snapshot to observe instead of making
            // it pay for a reload of its own.
            let _ = self.reload();
        }
        let published = result?;
        if published {
            self.auto_compact()?;
        }
        Ok(published)
    }

    fn add_once(&self, write: impl FnOnce(&mut TableWriter<File>, u64) -> Result<()>) -> Result<bool> {
        let _serialize = self.write_lock.lock().unwrap();

        let snapshot = self.snapshot.load();
        let next = next_update_index(&snapshot.readers);
        let observed_names = names_of(&snapshot.readers);

        let mut lock = match FileLock::acquire(manifest::lock_path(&self.manifest_path)) {
            Ok(lock) => lock,
            Err(StackError::LockContention) => {
                log::debug!("add at update index {next} lost the manifest lock race");
                return Err(StackError::LockContention);
            }
            Err(e) => return Err(e),
        };

        let current_names = manifest::read_names(&self.manifest_path)?;
        if current_names != observed_names {
            let _ = lock.release();
            log::debug!("add at update index {next} observed the manifest change underneath it");
            return Err(StackError::LockContention);
        }

        let table_name = naming::table_file_name(next, next);
        let table_path = self.dir.join(&table_name);
        let tmp_path = self.dir.join(format!("{table_name}.tmp"));

        let file = File::create(&tmp_path)?;
        let mut writer = TableWriter::new(file, self.config.writer.clone());

        let outcome = write(&mut writer, next).and_then(|_| writer.close());
        let summary = match outcome {
            Ok(summary) => summary,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                let _ = lock.release();
                return Err(e);
            }
        };

        if summary.ref_count == 0 && summary.log_count == 0 {
            let _ = fs::remove_file(&tmp_path);
            let _ = lock.release();
            return Ok(false);
        }

        if summary.min_update_index < next {
            let _ = fs::remove_file(&tmp_path);
            let _ = lock.release();
            log::debug!(
                "add at update index {next} saw a stale write callback (wrote from {})",
                summary.min_update_index
            );
            return Err(StackError::LockContention);
        }

        if let Err(e) = fs::rename(&tmp_path, &table_path) {
            let _ = fs::remove_file(&tmp_path);
            let _ = lock.release();
            return Err(e.into());
        }

        let mut new_names = current_names;
        new_names.push(table_name.clone());
        if let Err(e) = lock.write_all(manifest::encode_names(&new_names).as_bytes()) {
            let _ = fs::remove_file(&table_path);
            return Err(e.into());
        }
        if let Err(e) = lock.rename_onto(&self.manifest_path) {
            let _ = fs::remove_file(&table_path);
            return Err(e.into());
        }

        if let Ok(meta) = table_path.metadata() {
            self.stats.add_bytes(meta.len());
        }

        let readers = reload::reload(
            &self.dir,
            &self.manifest_path,
            Vec::new(),
            self.config.reload_deadline,
            self.config.backoff_base,
        )?;
        self.install(readers);
        log::info!("published table {table_name} covering update index {next}");
        Ok(true)
    }
}
