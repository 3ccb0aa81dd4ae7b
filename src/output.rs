use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    ClearResult, ExportResult, GoFetchResult, ProgressEvent, ProgressSink, SessionList,
    SessionSummary,
};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(result: &SessionSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_export(result: &ExportResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_sessions(result: &SessionList) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_clear(result: &ClearResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_go(result: &GoFetchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Progress goes to the log only; stdout carries the JSON result.
impl ProgressSink for JsonOutput {
    fn event(&self, event: ProgressEvent) {
        tracing::debug!(elapsed = ?event.elapsed, "{}", event.message);
    }
}
