mod command;
mod fairshare;
mod jobs;
mod misc;
mod partitions;
mod qos;

use std::fmt;

pub use command::run;
pub use fairshare::{FairShare, FairShareMetrics, UserAccount};
pub use jobs::JobState;
pub use partitions::{CPUState, PartitionMetrics, Partitions};
pub use qos::{Qos, QosMetrics};

use color_eyre::Result;

/// Slurm command-line tools queried by the exporter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tool {
    Sinfo,
    Squeue,
    Sshare,
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Tool::Sinfo => "sinfo",
            Tool::Squeue => "squeue",
            Tool::Sshare => "sshare",
        };

        fmt::Display::fmt(name, f)
    }
}

/// Provider of raw Slurm command output
pub trait Source: Send + Sync {
    /// Runs `tool` with `args`, returning its standard output
    fn query(&self, tool: Tool, args: &[String]) -> Result<String>;
}

/// Queries Slurm by executing its command-line tools
#[derive(Clone, Debug)]
pub struct Slurm {
    /// Location of `sinfo` executable
    pub sinfo: String,
    /// Location of `squeue` executable
    pub squeue: String,
    /// Location of `sshare` executable
    pub sshare: String,
}

impl Source for Slurm {
    fn query(&self, tool: Tool, args: &[String]) -> Result<String> {
        let exe = match tool {
            Tool::Sinfo => &self.sinfo,
            Tool::Squeue => &self.squeue,
            Tool::Sshare => &self.sshare,
        };

        run(exe, args)
    }
}
