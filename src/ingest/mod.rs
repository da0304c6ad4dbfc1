//! Everything between a bank's CSV export on disk and a list of `TransactionRecord`s: finding the
//! files, reading them, resolving their columns and normalizing dates and amounts.

pub mod columns;
pub mod dates;
pub mod files;
pub mod normalize;
pub mod reader;

pub use files::{collect_all, collect_files, has_extension, DELIMITED_EXTENSIONS};
pub use normalize::{normalize, DateColumnUnusable, DateRange, Normalized, NormalizedRow};
pub use reader::{read_csv, BadLinePolicy, ColumnRef, CsvOptions, Table};
