use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::crc::crc32c;
use crate::error::{Result, StackError};
use crate::io_ext::ReadExt;

use super::record::{LogRecord, RefRecord, RefValue};
use super::writer::{MAGIC, VERSION};

const HEADER_SIZE: u64 = 4 + 1 + 8 + 8;
const FOOTER_SIZE: u64 = 4 + 4;

const TAG_VALUE: u8 = 0;
const TAG_DELETION: u8 = 1;

/// A single immutable reftable file, fully materialized in memory on open.
///
/// Real reftable implementations keep the body on disk and binary-search
/// block indexes; tables produced by this stack are small enough that eager
/// loading keeps `seek_ref`/`seek_log` simple without sacrificing the
/// external contract (name, size, update-index range, ordered seeks).
pub struct TableReader {
    name: String,
    size: u64,
    min_update_index: u64,
    max_update_index: u64,
    refs: Vec<RefRecord>,
    logs: Vec<LogRecord>,
}

impl TableReader {
    pub fn open(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StackError::Corrupt(format!("non-utf8 table path: {path:?}")))?
            .to_string();
        let mut file = File::open(path)?;
        let size = file.metadata()?.len();
        Self::read(&mut file, name, size)
    }

    fn read(file: &mut File, name: String, size: u64) -> Result<Self> {
        if size < HEADER_SIZE + FOOTER_SIZE {
            return Err(StackError::Corrupt(format!("table {name} too small to be valid")));
        }

        let magic = file.read_u32()?;
        let version = file.read_u8()?;
        if magic != MAGIC {
            return Err(StackError::Corrupt(format!("table {name} has bad magic")));
        }
        if version != VERSION {
            return Err(StackError::Corrupt(format!(
                "table {name} has unsupported version {version}"
            )));
        }
        let min_update_index = file.read_u64()?;
        let max_update_index = file.read_u64()?;

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let ref_count = file.read_u32()?;
        let log_count = file.read_u32()?;

        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        let mut refs = Vec::with_capacity(ref_count as usize);
        for _ in 0..ref_count {
            refs.push(read_ref_record(file, &name)?);
        }
        let mut logs = Vec::with_capacity(log_count as usize);
        for _ in 0..log_count {
            logs.push(read_log_record(file, &name)?);
        }

        Ok(Self { name, size, min_update_index, max_update_index, refs, logs })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn min_update_index(&self) -> u64 {
        self.min_update_index
    }

    pub fn max_update_index(&self) -> u64 {
        self.max_update_index
    }

    pub fn ref_count(&self) -> usize {
        self.refs.len()
    }

    pub fn log_count(&self) -> usize {
        self.logs.len()
    }

    pub fn refs(&self) -> &[RefRecord] {
        &self.refs
    }

    pub fn logs(&self) -> &[LogRecord] {
        &self.logs
    }

    /// Returns ref records with name >= `prefix`, in ascending name order.
    pub fn seek_ref(&self, prefix: &str) -> impl Iterator<Item = &RefRecord> {
        let start = self.refs.partition_point(|r| r.ref_name.as_str() < prefix);
        self.refs[start..].iter()
    }

    /// Returns log records with name >= `prefix` and update_index <=
    /// `max_update_index`, in ascending name order.
    pub fn seek_log(&self, prefix: &str, max_update_index: u64) -> impl Iterator<Item = &LogRecord> {
        let start = self.logs.partition_point(|r| r.ref_name.as_str() < prefix);
        self.logs[start..]
            .iter()
            .filter(move |r| r.update_index <= max_update_index)
    }

    /// No persistent file handle is retained past `open`, so this is a no-op;
    /// kept so callers can close readers uniformly regardless of backend.
    pub fn close(self) {}
}

fn read_framed(file: &mut File, table_name: &str) -> Result<Vec<u8>> {
    let crc = file.read_u32()?;
    let len = file.read_u32()?;
    let payload = file.read_bytes_with_len(len as usize)?;
    if crc32c(&payload) != crc {
        return Err(StackError::Corrupt(format!("table {table_name} has a bad record checksum")));
    }
    Ok(payload)
}

fn read_ref_record(file: &mut File, table_name: &str) -> Result<RefRecord> {
    let payload = read_framed(file, table_name)?;
    let mut cursor = io::Cursor::new(payload);
    let ref_name = cursor.read_string()?;
    let update_index = cursor.read_u64()?;
    let tag = cursor.read_u8()?;
    let value = match tag {
        TAG_VALUE => RefValue::Value(cursor.read_bytes()?),
        TAG_DELETION => RefValue::Deletion,
        other => {
            return Err(StackError::Corrupt(format!(
                "table {table_name} has unknown ref tag {other}"
            )))
        }
    };
    Ok(RefRecord { ref_name, update_index, value })
}

fn read_log_record(file: &mut File, table_name: &str) -> Result<LogRecord> {
    let payload = read_framed(file, table_name)?;
    let mut cursor = io::Cursor::new(payload);
    Ok(LogRecord {
        ref_name: cursor.read_string()?,
        update_index: cursor.read_u64()?,
        old_value: cursor.read_bytes()?,
        new_value: cursor.read_bytes()?,
        name: cursor.read_string()?,
        email: cursor.read_string()?,
        message: cursor.read_string()?,
    })
}
