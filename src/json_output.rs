use crate::report::now_stamp;
use anyhow::Result;
use serde::Serialize;

/// Machine-readable result of one subcommand, printed with `--json`.
#[derive(Debug, Serialize)]
pub struct CommandOutput<'a, T: Serialize> {
    pub command: &'a str,
    pub finished_at: String,
    pub result: &'a T,
}

impl<'a, T: Serialize> CommandOutput<'a, T> {
    pub fn new(command: &'a str, result: &'a T) -> Self {
        Self {
            command,
            finished_at: now_stamp(),
            result,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
