use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use color_eyre::Result;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use tracing::trace;

use crate::collector::{GaugeSpec, Pipeline};

use super::jobs::{squeue, JobState};
use super::misc::{format_string, lenient_number, names, reader};
use super::{Source, Tool};

/// Summarizes the state of CPUs in a partition
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CPUState {
    /// Allocated CPUs
    pub allocated: f64,
    /// Idle CPUs
    pub idle: f64,
    /// Unavailable CPUs
    pub other: f64,
    /// Total number of CPUs
    pub total: f64,
}

impl<'de> Deserialize<'de> for CPUState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(CPUStateVisitor)
    }
}

struct CPUStateVisitor;

impl<'de> Visitor<'de> for CPUStateVisitor {
    type Value = CPUState;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a string representing CPU states in the form '0/1/2/3'")
    }

    /// Requires exactly four positions; values that are not numbers are counted as zero
    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        let values: Vec<&str> = v.split('/').collect();
        if let &[allocated, idle, other, total] = values.as_slice() {
            Ok(CPUState {
                allocated: lenient_number(allocated),
                idle: lenient_number(idle),
                other: lenient_number(other),
                total: lenient_number(total),
            })
        } else {
            Err(E::custom(format!("expected 4 CPU states, found {:?}", v)))
        }
    }
}

/// A line of `sinfo -o%R,%C` output
#[derive(Debug, Deserialize)]
struct PartitionRow {
    name: String,
    cpus: CPUState,
}

/// CPU and job counts for a single partition
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PartitionMetrics {
    pub cpus_allocated: f64,
    pub cpus_idle: f64,
    pub cpus_other: f64,
    pub cpus_total: f64,
    pub jobs_running: u64,
    pub jobs_pending: u64,
    /// Always equal to `jobs_running + jobs_pending`
    pub jobs_total: u64,
}

impl PartitionMetrics {
    fn count_job(&mut self, state: JobState) {
        match state {
            JobState::Running => self.jobs_running += 1,
            JobState::Pending => self.jobs_pending += 1,
        }

        self.jobs_total += 1;
    }
}

/// Per-partition CPU states and job queue depth
pub struct Partitions {
    source: Arc<dyn Source>,
}

impl Partitions {
    pub fn new(source: Arc<dyn Source>) -> Self {
        Self { source }
    }

    /// Queries `sinfo` and `squeue` and aggregates metrics per partition
    pub fn collect(source: &dyn Source) -> Result<HashMap<String, PartitionMetrics>> {
        let sinfo = source.query(
            Tool::Sinfo,
            &["-h".to_string(), format_string(["%R", "%C"].iter())],
        )?;
        let running = squeue(source, JobState::Running, &["%P"])?;
        let pending = squeue(source, JobState::Pending, &["%P"])?;

        let partitions = Self::parse(&sinfo);
        let partitions = Self::count_jobs(partitions, &running, JobState::Running);

        Ok(Self::count_jobs(partitions, &pending, JobState::Pending))
    }

    /// Parses `sinfo -o%R,%C` output; lines that are not `name,A/I/O/T` are skipped
    pub fn parse(text: &str) -> HashMap<String, PartitionMetrics> {
        let mut partitions = HashMap::new();

        for record in reader(text, b',', false).records().flatten() {
            if record.len() != 2 {
                trace!(?record, "skipping sinfo line");
                continue;
            }

            match record.deserialize::<PartitionRow>(None) {
                Ok(row) if row.name.is_empty() => trace!(?record, "skipping unnamed partition"),
                Ok(row) => {
                    let metrics: &mut PartitionMetrics = partitions.entry(row.name).or_default();
                    metrics.cpus_allocated = row.cpus.allocated;
                    metrics.cpus_idle = row.cpus.idle;
                    metrics.cpus_other = row.cpus.other;
                    metrics.cpus_total = row.cpus.total;
                }
                Err(error) => trace!(?record, %error, "skipping sinfo line"),
            }
        }

        partitions
    }

    /// Counts jobs listed by `squeue -o%P`; jobs in partitions not reported by `sinfo`
    /// are ignored
    pub fn count_jobs(
        mut partitions: HashMap<String, PartitionMetrics>,
        text: &str,
        state: JobState,
    ) -> HashMap<String, PartitionMetrics> {
        for name in names(text) {
            match partitions.get_mut(name) {
                Some(metrics) => metrics.count_job(state),
                None => trace!(partition = name, %state, "job in unknown partition"),
            }
        }

        partitions
    }
}

impl Pipeline for Partitions {
    type Key = String;
    type Record = PartitionMetrics;

    const NAME: &'static str = "partitions";
    const LABELS: &'static [&'static str] = &["partition"];
    const GAUGES: &'static [GaugeSpec<PartitionMetrics>] = &[
        GaugeSpec {
            name: "slurm_partition_cpus_allocated",
            help: "Allocated CPUs for partition",
            value: |m| m.cpus_allocated,
        },
        GaugeSpec {
            name: "slurm_partition_cpus_idle",
            help: "Idle CPUs for partition",
            value: |m| m.cpus_idle,
        },
        GaugeSpec {
            name: "slurm_partition_cpus_other",
            help: "Other CPUs for partition",
            value: |m| m.cpus_other,
        },
        GaugeSpec {
            name: "slurm_partition_jobs_running",
            help: "Running jobs for partition",
            value: |m| m.jobs_running as f64,
        },
        GaugeSpec {
            name: "slurm_partition_jobs_pending",
            help: "Pending jobs for partition",
            value: |m| m.jobs_pending as f64,
        },
        GaugeSpec {
            name: "slurm_partition_jobs_total",
            help: "Total jobs for partition",
            value: |m| m.jobs_total as f64,
        },
        GaugeSpec {
            name: "slurm_partition_cpus_total",
            help: "Total CPUs for partition",
            value: |m| m.cpus_total,
        },
    ];

    fn compute(&self) -> Result<HashMap<String, PartitionMetrics>> {
        Self::collect(self.source.as_ref())
    }

    fn label_values(key: &String) -> Vec<&str> {
        vec![key.as_str()]
    }
}
