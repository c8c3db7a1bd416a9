use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::{Result, StackError};
use crate::manifest;
use crate::table::TableReader;

/// Opens every table named in `target_names`, reusing a reader from
/// `old_readers` by name when one is already open. Readers left over in
/// `old_readers` (tables no longer listed) are dropped.
fn reload_once(dir: &Path, old_readers: Vec<TableReader>, target_names: &[String]) -> Result<Vec<TableReader>> {
    let mut by_name: HashMap<String, TableReader> =
        old_readers.into_iter().map(|r| (r.name().to_string(), r)).collect();

    let mut readers = Vec::with_capacity(target_names.len());
    for name in target_names {
        let reader = match by_name.remove(name) {
            Some(r) => r,
            None => TableReader::open(&dir.join(name))?,
        };
        readers.push(reader);
    }
    Ok(readers)
}

/// Reloads the reader set for a manifest, retrying with randomized
/// doubling back-off while the manifest (or a table it names) transiently
/// disappears out from under us, which happens when an external compaction
/// publishes a new manifest and removes an old table between our reading
/// the manifest and opening the table it names. Gives up once `deadline`
/// has elapsed and the manifest is still unreadable.
pub(crate) fn reload(
    dir: &Path,
    manifest_path: &Path,
    mut old_readers: Vec<TableReader>,
    deadline: Duration,
    backoff_base: Duration,
) -> Result<Vec<TableReader>> {
    let start = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        let names = manifest::read_names(manifest_path)?;
        match reload_once(dir, old_readers, &names) {
            Ok(readers) => return Ok(readers),
            Err(e) if e.is_not_found_io() => {
                if start.elapsed() >= deadline {
                    log::warn!(
                        "reload of {} gave up after {:?}, a table named in the manifest never appeared",
                        manifest_path.display(),
                        start.elapsed()
                    );
                    return Err(StackError::NotFound { path: manifest_path.to_path_buf() });
                }
                let backoff = backoff_base.saturating_mul(1 << attempt.min(16));
                let jitter = rand::thread_rng().gen_range(1.0..2.0);
                log::debug!("reload attempt {attempt} raced a concurrent compaction, retrying");
                std::thread::sleep(backoff.mul_f64(jitter));
                attempt += 1;
                // Whatever we'd already opened is likely stale if the race
                // was real; start the next attempt fresh rather than racing
                // readers we can no longer vouch for.
                old_readers = Vec::new();
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableWriterConfig;
    use crate::table::{RefRecord, TableWriter};
    use std::fs;

    fn write_table(dir: &Path, min: u64, max: u64, names: &[&str]) -> String {
        let file_name = super::super::naming::table_file_name(min, max);
        let file = fs::File::create(dir.join(&file_name)).unwrap();
        let mut writer = TableWriter::new(file, TableWriterConfig::default());
        writer.set_limits(min, max).unwrap();
        for (i, name) in names.iter().enumerate() {
            writer.add_ref(RefRecord::value(*name, min + i as u64, vec![1])).unwrap();
        }
        writer.close().unwrap();
        file_name
    }

    #[test]
    fn reload_reuses_readers_present_in_both_sets() {
        let dir = tempfile::tempdir().unwrap();
        let name = write_table(dir.path(), 1, 1, &["refs/heads/main"]);
        let manifest_path = dir.path().join("manifest");
        fs::write(&manifest_path, manifest::encode_names(&[name.clone()])).unwrap();

        let readers = reload(dir.path(), &manifest_path, Vec::new(), Duration::from_millis(100), Duration::from_millis(1))
            .unwrap();
        assert_eq!(readers.len(), 1);
        assert_eq!(readers[0].name(), name);
    }

    #[test]
    fn reload_drops_tables_no_longer_listed() {
        let dir = tempfile::tempdir().unwrap();
        let old_name = write_table(dir.path(), 1, 1, &["refs/heads/old"]);
        let new_name = write_table(dir.path(), 2, 2, &["refs/heads/new"]);
        let manifest_path = dir.path().join("manifest");

        fs::write(&manifest_path, manifest::encode_names(&[old_name.clone()])).unwrap();
        let first = reload(dir.path(), &manifest_path, Vec::new(), Duration::from_millis(100), Duration::from_millis(1))
            .unwrap();

        fs::write(&manifest_path, manifest::encode_names(&[new_name.clone()])).unwrap();
        let second = reload(dir.path(), &manifest_path, first, Duration::from_millis(100), Duration::from_millis(1))
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].name(), new_name);
    }
}
