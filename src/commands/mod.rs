//! Command handlers for the ledger-ingest CLI. Each handler takes the loaded `Config` and returns
//! an `Out` for `main` to print.

mod check;
mod import;

use serde::Serialize;
use std::fmt::Debug;
use tracing::{debug, info};

pub use check::{check, CheckReport, SourceCheck};
pub use import::{import, ImportReport, SourceReport};

/// What a command hands back: a one-line message for the operator and, optionally, a report
/// with the details of the run.
#[derive(Debug, Clone, Serialize)]
pub struct Out<T>
where
    T: Serialize + Clone + Debug,
{
    message: String,
    structure: Option<T>,
}

impl<T> Out<T>
where
    T: Serialize + Clone + Debug,
{
    pub fn new(message: impl Into<String>, structure: T) -> Self {
        Self {
            message: message.into(),
            structure: Some(structure),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn structure(&self) -> Option<&T> {
        self.structure.as_ref()
    }

    /// Logs the message at info and the report, as pretty JSON, at debug.
    pub fn print(&self) {
        info!("{}", self.message);
        let Some(structure) = self.structure() else {
            return;
        };
        match serde_json::to_string_pretty(structure) {
            Ok(json) => debug!("Command output:\n\n{json}\n\n"),
            Err(e) => debug!("Unable to serialize the command output: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_json_shape() {
        let out = Out::new("added 2", vec![1usize, 1]);
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["message"], "added 2");
        assert_eq!(json["structure"], serde_json::json!([1, 1]));
        assert_eq!(out.structure(), Some(&vec![1, 1]));
    }
}
