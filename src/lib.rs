/// Command-line arguments
pub mod args;
/// Prometheus collectors for aggregated Slurm state
pub mod collector;
/// HTTP exposition of metrics
pub mod server;
/// Querying of Slurm state
pub mod slurm;
