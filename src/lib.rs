pub mod args;
pub mod backup;
pub mod commands;
pub mod config;
pub mod dedup;
mod error;
pub mod ingest;
pub mod insert;
pub mod logfile;
pub mod model;
pub mod sheet;
mod utils;

#[cfg(test)]
mod test;

pub use config::Config;
pub use error::Error;
pub use error::Result;
