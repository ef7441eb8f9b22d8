use std::collections::HashMap;
use std::hash::Hash;

use color_eyre::eyre::Context;
use color_eyre::Result;
use parking_lot::Mutex;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts};
use tracing::{debug, error};

/// A gauge exported for every record of a [`Pipeline`]
pub struct GaugeSpec<R> {
    pub name: &'static str,
    pub help: &'static str,
    /// Extracts the value of the gauge from a record
    pub value: fn(&R) -> f64,
}

/// Queries Slurm and aggregates the output into one record per key
pub trait Pipeline: Send + Sync + 'static {
    type Key: Eq + Hash + 'static;
    type Record: 'static;

    /// Name used in log messages and errors
    const NAME: &'static str;
    /// Names of the labels identifying a key; see [`Pipeline::label_values`]
    const LABELS: &'static [&'static str];
    const GAUGES: &'static [GaugeSpec<Self::Record>];

    /// Runs the underlying Slurm commands and aggregates their output
    fn compute(&self) -> Result<HashMap<Self::Key, Self::Record>>;

    /// Label values for `key`, in the order given by [`Pipeline::LABELS`]
    fn label_values(key: &Self::Key) -> Vec<&str>;
}

/// A [`Collector`] whose scrape can fail. [`Collector::collect`] has no way of
/// reporting errors, so callers that must not serve partial results use
/// [`Scrape::try_collect`] instead
pub trait Scrape: Collector {
    fn try_collect(&self) -> Result<Vec<MetricFamily>>;
}

/// Exports the records of a [`Pipeline`] as gauges, re-running the pipeline on every scrape
pub struct SlurmCollector<P: Pipeline> {
    pipeline: P,
    gauges: Vec<GaugeVec>,
    /// Serializes scrapes, since they share `gauges`
    scrape: Mutex<()>,
}

impl<P: Pipeline> SlurmCollector<P> {
    pub fn new(pipeline: P) -> Result<Self> {
        let gauges = P::GAUGES
            .iter()
            .map(|spec| GaugeVec::new(Opts::new(spec.name, spec.help), P::LABELS))
            .collect::<Result<Vec<_>, _>>()
            .wrap_err_with(|| format!("creating {} gauges", P::NAME))?;

        Ok(Self {
            pipeline,
            gauges,
            scrape: Mutex::new(()),
        })
    }
}

impl<P: Pipeline> Scrape for SlurmCollector<P> {
    /// Aggregates current values and returns every non-zero value as a labelled gauge.
    /// Zero values are left out entirely
    fn try_collect(&self) -> Result<Vec<MetricFamily>> {
        let records = self
            .pipeline
            .compute()
            .wrap_err_with(|| format!("collecting {} metrics", P::NAME))?;

        debug!(collector = P::NAME, records = records.len(), "aggregated records");

        let _guard = self.scrape.lock();
        for gauge in &self.gauges {
            gauge.reset();
        }

        for (key, record) in &records {
            let labels = P::label_values(key);

            for (spec, gauge) in P::GAUGES.iter().zip(&self.gauges) {
                let value = (spec.value)(record);
                if value > 0.0 {
                    gauge.with_label_values(&labels).set(value);
                }
            }
        }

        Ok(self
            .gauges
            .iter()
            .flat_map(|gauge| gauge.collect())
            .filter(|family| !family.get_metric().is_empty())
            .collect())
    }
}

impl<P: Pipeline> Collector for SlurmCollector<P> {
    fn desc(&self) -> Vec<&Desc> {
        self.gauges.iter().flat_map(|gauge| gauge.desc()).collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        match self.try_collect() {
            Ok(families) => families,
            Err(report) => {
                error!(collector = P::NAME, error = ?report, "scrape failed");
                Vec::new()
            }
        }
    }
}
