use std::sync::Arc;

use color_eyre::eyre::Context;
use color_eyre::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use slurm_exporter::args::Args;
use slurm_exporter::server::{serve, Exporter};

fn main() -> Result<()> {
    color_eyre::install()?;

    let args: Args = argh::from_env();
    if args.version {
        println!("slurm-exporter v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&args.log_level)
            .wrap_err_with(|| format!("invalid log level: {}", args.log_level))?,
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let exporter = Arc::new(Exporter::new(Arc::new(args.slurm()), &args)?);
    info!(version = env!("CARGO_PKG_VERSION"), "starting slurm-exporter");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .wrap_err("building tokio runtime")?;

    // A failed scrape ends up here; the process exits rather than serving stale metrics
    let result = rt.block_on(serve(exporter, &args.listen_address, &args.metrics_path));
    rt.shutdown_background();

    result
}
