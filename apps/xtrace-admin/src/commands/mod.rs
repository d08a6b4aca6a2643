//! Subcommand implementations.
//!
//! Each command writes its result to stdout, either as plain text or as
//! pretty JSON when `--json` is given.

pub mod allocate;
pub mod epcis;
pub mod pools;
pub mod serials;

use anyhow::Result;
use serde::Serialize;

/// How a command finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Done,
    /// Ran, but delivered less than asked.
    Partial,
}

/// Result printer shared by all commands.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Output { json }
    }

    /// Prints `value` as JSON, or the text produced by `text`.
    pub fn emit<T, F>(&self, value: &T, text: F) -> Result<()>
    where
        T: Serialize,
        F: FnOnce() -> String,
    {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text());
        }
        Ok(())
    }
}
