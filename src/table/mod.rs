pub mod merge;
pub mod reader;
pub mod record;
pub mod writer;

pub use merge::MergedView;
pub use reader::TableReader;
pub use record::{LogRecord, RefRecord, RefValue};
pub use writer::{TableSummary, TableWriter};
