use std::fmt;

use color_eyre::Result;

use super::{misc::format_string, Source, Tool};

/// Job states counted by the exporter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    /// Waiting for resources to become available
    Pending,
    Running,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
        };

        fmt::Display::fmt(state, f)
    }
}

/// Lists all jobs (including hidden jobs and one line per array task) in `state`,
/// printing the given `squeue` field specifiers without a header
pub fn squeue(source: &dyn Source, state: JobState, fields: &[&str]) -> Result<String> {
    source.query(Tool::Squeue, &squeue_args(state, fields))
}

fn squeue_args(state: JobState, fields: &[&str]) -> Vec<String> {
    vec![
        "-a".to_string(),
        "-r".to_string(),
        "-h".to_string(),
        format_string(fields.iter()),
        format!("--states={}", state),
    ]
}
