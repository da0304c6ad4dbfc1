//! Types that represent the core data model: `Amount`, `TransactionRecord` and the layout of the
//! ledger workbook.
mod amount;
pub mod ledger;
mod record;

pub use amount::{Amount, AmountError};
pub use record::TransactionRecord;
