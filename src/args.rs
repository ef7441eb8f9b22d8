use argh::FromArgs;

use crate::slurm::Slurm;

/// Prometheus exporter for Slurm partitions, QoS, and fair-share
#[derive(FromArgs, Debug)]
pub struct Args {
    /// address on which to expose metrics, e.g. `0.0.0.0:8080` or `:8080`
    #[argh(option, default = "\"0.0.0.0:8080\".to_string()")]
    pub listen_address: String,

    /// path under which to expose metrics
    #[argh(option, default = "\"/metrics\".to_string()")]
    pub metrics_path: String,

    /// location of `sinfo` executable
    #[argh(option, default = "\"sinfo\".to_string()")]
    pub sinfo: String,

    /// location of `squeue` executable
    #[argh(option, default = "\"squeue\".to_string()")]
    pub squeue: String,

    /// location of `sshare` executable
    #[argh(option, default = "\"sshare\".to_string()")]
    pub sshare: String,

    /// limit fair-share metrics to this account; may be repeated
    #[argh(option)]
    pub account: Vec<String>,

    /// disable fair-share metrics, e.g. on clusters without slurmdbd
    #[argh(switch)]
    pub no_fairshare: bool,

    /// log filter such as `info` or `slurm_exporter=debug`; RUST_LOG takes precedence
    #[argh(option, default = "\"info\".to_string()")]
    pub log_level: String,

    /// print version information
    #[argh(switch, short = 'v')]
    pub version: bool,
}

impl Args {
    /// Returns the Slurm commands to run
    pub fn slurm(&self) -> Slurm {
        Slurm {
            sinfo: self.sinfo.clone(),
            squeue: self.squeue.clone(),
            sshare: self.sshare.clone(),
        }
    }
}
