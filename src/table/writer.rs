use std::io::{self, Write};

use crate::config::TableWriterConfig;
use crate::crc::crc32c;
use crate::error::{Result, StackError};
use crate::io_ext::WriteExt;

use super::record::{LogRecord, RefRecord, RefValue};

pub(crate) const MAGIC: u32 = 0x5245_4631; // "REF1"
pub(crate) const VERSION: u8 = 1;

const TAG_VALUE: u8 = 0;
const TAG_DELETION: u8 = 1;

/// Summary of a table produced by [`TableWriter::close`].
#[derive(Debug, Clone, Copy)]
pub struct TableSummary {
    pub min_update_index: u64,
    pub max_update_index: u64,
    pub ref_count: u32,
    pub log_count: u32,
}

/// Streams ref and log records into a single reftable file.
///
/// Mirrors the header/body/footer shape of a page-chunked sstable writer, but
/// since a single table's record count is small enough to hold in memory on
/// the read side, the writer does not need a chunk directory: it streams
/// length+CRC framed records and finishes with a small fixed-size footer
/// carrying the counts needed to know where the ref section ends.
pub struct TableWriter<F: Write> {
    file: F,
    #[allow(dead_code)]
    config: TableWriterConfig,
    limits: Option<(u64, u64)>,
    header_written: bool,
    last_ref_name: Option<String>,
    last_log_name: Option<String>,
    ref_count: u32,
    log_count: u32,
}

impl<F: Write> TableWriter<F> {
    pub fn new(file: F, config: TableWriterConfig) -> Self {
        Self {
            file,
            config,
            limits: None,
            header_written: false,
            last_ref_name: None,
            last_log_name: None,
            ref_count: 0,
            log_count: 0,
        }
    }

    /// Declares the update-index range this table covers. Must be called
    /// before any record is added.
    pub fn set_limits(&mut self, min_update_index: u64, max_update_index: u64) -> Result<()> {
        if min_update_index > max_update_index {
            return Err(StackError::InvalidWrite(
                "min_update_index exceeds max_update_index".into(),
            ));
        }
        self.limits = Some((min_update_index, max_update_index));
        self.write_header()?;
        Ok(())
    }

    pub fn min_update_index(&self) -> Option<u64> {
        self.limits.map(|(min, _)| min)
    }

    pub fn max_update_index(&self) -> Option<u64> {
        self.limits.map(|(_, max)| max)
    }

    fn write_header(&mut self) -> io::Result<()> {
        if self.header_written {
            return Ok(());
        }
        let (min, max) = self.limits.expect("set_limits called before write_header");
        self.file.write_u32(MAGIC)?;
        self.file.write_u8(VERSION)?;
        self.file.write_u64(min)?;
        self.file.write_u64(max)?;
        self.header_written = true;
        Ok(())
    }

    /// Appends a ref record. Ref names must be added in strictly increasing
    /// order; a single table never holds two records for the same name.
    pub fn add_ref(&mut self, record: RefRecord) -> Result<()> {
        self.require_limits()?;
        if let Some(last) = &self.last_ref_name {
            if *last >= record.ref_name {
                return Err(StackError::InvalidWrite(format!(
                    "ref records must be added in strictly increasing order: {last:?} then {:?}",
                    record.ref_name
                )));
            }
        }
        self.last_ref_name = Some(record.ref_name.clone());

        let mut payload = Vec::new();
        payload.write_string(&record.ref_name)?;
        payload.write_u64(record.update_index)?;
        match &record.value {
            RefValue::Value(v) => {
                payload.write_u8(TAG_VALUE)?;
                payload.write_bytes(v)?;
            }
            RefValue::Deletion => {
                payload.write_u8(TAG_DELETION)?;
            }
        }
        self.write_framed(&payload)?;
        self.ref_count += 1;
        Ok(())
    }

    /// Appends a log record. Log names must be added in non-decreasing order;
    /// unlike refs, a name may repeat across successive log entries.
    pub fn add_log(&mut self, record: LogRecord) -> Result<()> {
        self.require_limits()?;
        if let Some(last) = &self.last_log_name {
            if *last > record.ref_name {
                return Err(StackError::InvalidWrite(format!(
                    "log records must be added in non-decreasing order: {last:?} then {:?}",
                    record.ref_name
                )));
            }
        }
        self.last_log_name = Some(record.ref_name.clone());

        let mut payload = Vec::new();
        payload.write_string(&record.ref_name)?;
        payload.write_u64(record.update_index)?;
        payload.write_bytes(&record.old_value)?;
        payload.write_bytes(&record.new_value)?;
        payload.write_string(&record.name)?;
        payload.write_string(&record.email)?;
        payload.write_string(&record.message)?;
        self.write_framed(&payload)?;
        self.log_count += 1;
        Ok(())
    }

    fn write_framed(&mut self, payload: &[u8]) -> io::Result<()> {
        self.file.write_u32(crc32c(payload))?;
        self.file.write_u32(payload.len() as u32)?;
        self.file.write_all(payload)
    }

    fn require_limits(&self) -> Result<()> {
        if self.limits.is_none() {
            return Err(StackError::InvalidWrite(
                "set_limits must be called before adding records".into(),
            ));
        }
        Ok(())
    }

    /// Writes the footer and returns a summary of what was written. Produces
    /// an empty table (header + zeroed footer) if `set_limits` was never
    /// called, matching a no-op transaction.
    pub fn close(mut self) -> Result<TableSummary> {
        if !self.header_written {
            self.limits = Some((0, 0));
            self.write_header()?;
        }
        self.file.write_u32(self.ref_count)?;
        self.file.write_u32(self.log_count)?;
        let (min, max) = self.limits.unwrap();
        Ok(TableSummary {
            min_update_index: min,
            max_update_index: max,
            ref_count: self.ref_count,
            log_count: self.log_count,
        })
    }
}
