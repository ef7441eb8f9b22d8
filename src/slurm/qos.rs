use std::collections::HashMap;
use std::sync::Arc;

use color_eyre::Result;
use serde::Deserialize;
use tracing::trace;

use crate::collector::{GaugeSpec, Pipeline};

use super::jobs::{squeue, JobState};
use super::misc::{lenient_f64, names, reader};
use super::Source;

/// A line of `squeue -o%q,%C` output
#[derive(Debug, Deserialize)]
struct RunningJob {
    qos: String,
    #[serde(deserialize_with = "lenient_f64")]
    cpus: f64,
}

/// CPU and job counts for a single QoS
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QosMetrics {
    /// Sum of CPUs allocated to running jobs
    pub cpus_allocated: f64,
    pub jobs_running: u64,
    pub jobs_pending: u64,
    pub jobs_total: u64,
}

/// Per-QoS CPU allocation and job queue depth
pub struct Qos {
    source: Arc<dyn Source>,
}

impl Qos {
    pub fn new(source: Arc<dyn Source>) -> Self {
        Self { source }
    }

    /// Queries `squeue` for running and pending jobs and aggregates metrics per QoS
    pub fn collect(source: &dyn Source) -> Result<HashMap<String, QosMetrics>> {
        let running = squeue(source, JobState::Running, &["%q", "%C"])?;
        let pending = squeue(source, JobState::Pending, &["%q"])?;

        Ok(Self::count_pending(Self::count_running(HashMap::new(), &running), &pending))
    }

    /// Counts jobs and allocated CPUs listed by `squeue -o%q,%C`. Jobs without a QoS
    /// and lines that are not `qos,cpus` are skipped
    pub fn count_running(
        mut qoses: HashMap<String, QosMetrics>,
        text: &str,
    ) -> HashMap<String, QosMetrics> {
        for record in reader(text, b',', false).records().flatten() {
            if record.len() != 2 {
                trace!(?record, "skipping squeue line");
                continue;
            }

            match record.deserialize::<RunningJob>(None) {
                Ok(job) if job.qos.is_empty() => {}
                Ok(job) => {
                    let metrics = qoses.entry(job.qos).or_default();
                    metrics.cpus_allocated += job.cpus;
                    metrics.jobs_running += 1;
                    metrics.jobs_total += 1;
                }
                Err(error) => trace!(?record, %error, "skipping squeue line"),
            }
        }

        qoses
    }

    /// Counts jobs listed by `squeue -o%q`
    pub fn count_pending(
        mut qoses: HashMap<String, QosMetrics>,
        text: &str,
    ) -> HashMap<String, QosMetrics> {
        for qos in names(text) {
            let metrics = qoses.entry(qos.to_string()).or_default();
            metrics.jobs_pending += 1;
            metrics.jobs_total += 1;
        }

        qoses
    }
}

impl Pipeline for Qos {
    type Key = String;
    type Record = QosMetrics;

    const NAME: &'static str = "qos";
    const LABELS: &'static [&'static str] = &["qos"];
    const GAUGES: &'static [GaugeSpec<QosMetrics>] = &[
        GaugeSpec {
            name: "slurm_qos_cpus_allocated",
            help: "Allocated CPUs for QOS",
            value: |m| m.cpus_allocated,
        },
        GaugeSpec {
            name: "slurm_qos_jobs_running",
            help: "Running jobs for QOS",
            value: |m| m.jobs_running as f64,
        },
        GaugeSpec {
            name: "slurm_qos_jobs_pending",
            help: "Pending jobs for QOS",
            value: |m| m.jobs_pending as f64,
        },
        GaugeSpec {
            name: "slurm_qos_jobs_total",
            help: "Total jobs for QOS",
            value: |m| m.jobs_total as f64,
        },
    ];

    fn compute(&self) -> Result<HashMap<String, QosMetrics>> {
        Self::collect(self.source.as_ref())
    }

    fn label_values(key: &String) -> Vec<&str> {
        vec![key.as_str()]
    }
}
