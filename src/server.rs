use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use color_eyre::eyre::{bail, Context, Report};
use color_eyre::Result;
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::args::Args;
use crate::collector::{Scrape, SlurmCollector};
use crate::slurm::{FairShare, Partitions, Qos, Source};

/// Time given to open connections, including the one whose scrape failed, to
/// receive their responses before the process exits
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The enabled Slurm collectors
pub struct Exporter {
    collectors: Vec<Box<dyn Scrape>>,
}

impl Exporter {
    pub fn new(source: Arc<dyn Source>, args: &Args) -> Result<Self> {
        let mut collectors: Vec<Box<dyn Scrape>> = vec![
            Box::new(SlurmCollector::new(Partitions::new(source.clone()))?),
            Box::new(SlurmCollector::new(Qos::new(source.clone()))?),
        ];

        if !args.no_fairshare {
            collectors.push(Box::new(SlurmCollector::new(FairShare::new(
                source,
                args.account.clone(),
            ))?));
        }

        Ok(Self { collectors })
    }

    /// Scrapes every collector. Fails if any collector fails, rather than returning
    /// partial results
    pub fn gather(&self) -> Result<Vec<MetricFamily>> {
        let mut families = Vec::new();
        for collector in &self.collectors {
            families.extend(collector.try_collect()?);
        }

        families.sort_by(|a, b| a.get_name().cmp(b.get_name()));
        Ok(families)
    }

    /// Scrapes every collector and encodes the result in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let families = self.gather()?;

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .wrap_err("encoding metrics")?;

        String::from_utf8(buffer).wrap_err("converting metrics to string")
    }
}

struct AppState {
    exporter: Arc<Exporter>,
    metrics_path: String,
    /// Scrape failures are forwarded to `serve`, which stops the server
    fatal: mpsc::Sender<Report>,
}

/// Rejects paths that are not a plain absolute path, including those `Router::route`
/// would treat as captures or wildcards, or that collide with the other routes
fn check_metrics_path(path: &str) -> Result<()> {
    let reserved = path == "/" || path == "/healthz";
    let pattern = path.contains(['{', '}'])
        || path
            .split('/')
            .any(|segment| segment.starts_with(':') || segment.starts_with('*'));

    if !path.starts_with('/') || reserved || pattern {
        bail!("invalid metrics path {:?}", path);
    }

    Ok(())
}

/// Serves metrics until SIGINT/SIGTERM is received or a scrape fails. A failed scrape
/// is returned as an error once open connections have been drained
pub async fn serve(exporter: Arc<Exporter>, listen_address: &str, metrics_path: &str) -> Result<()> {
    // Handle ":port" shorthand
    let bind_addr = if listen_address.starts_with(':') {
        format!("0.0.0.0{}", listen_address)
    } else {
        listen_address.to_string()
    };

    let listener = TcpListener::bind(&bind_addr)
        .await
        .wrap_err_with(|| format!("listening on {}", bind_addr))?;

    serve_on(listener, exporter, metrics_path).await
}

/// Serves metrics on an already bound listener; see [`serve`]
pub async fn serve_on(listener: TcpListener, exporter: Arc<Exporter>, metrics_path: &str) -> Result<()> {
    check_metrics_path(metrics_path)?;

    let (fatal, mut failed) = mpsc::channel(1);
    let state = Arc::new(AppState {
        exporter,
        metrics_path: metrics_path.to_string(),
        fatal,
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/healthz", get(healthz_handler))
        .route(metrics_path, get(metrics_handler))
        .with_state(state);

    let local_addr = listener.local_addr().wrap_err("getting local address")?;
    info!(addr = %local_addr, path = metrics_path, "serving metrics");

    // Shut down gracefully on a signal or on the first failed scrape
    let (report_tx, report_rx) = oneshot::channel::<Report>();
    let shutdown = async move {
        tokio::select! {
            _ = shutdown_signal() => {}
            Some(report) = failed.recv() => {
                let _ = report_tx.send(report);
            }
        }
    };

    let server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .into_future(),
    );

    match report_rx.await {
        Ok(report) => {
            if tokio::time::timeout(DRAIN_TIMEOUT, server).await.is_err() {
                warn!("timed out waiting for connections to close");
            }

            Err(report)
        }
        Err(_) => server
            .await
            .wrap_err("metrics server task failed")?
            .wrap_err("serving metrics"),
    }
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    let exporter = state.exporter.clone();
    let result = tokio::task::spawn_blocking(move || exporter.render())
        .await
        .wrap_err("scrape task failed")
        .and_then(|result| result);

    match result {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            text,
        )
            .into_response(),
        Err(report) => {
            error!(error = ?report, "scrape failed, shutting down");
            let _ = state.fatal.try_send(report);

            (StatusCode::INTERNAL_SERVER_ERROR, "scrape failed").into_response()
        }
    }
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(format!(
        "<html><head><title>Slurm Exporter</title></head><body>\
         <h1>Slurm Exporter</h1><p><a href=\"{0}\">{0}</a></p></body></html>",
        state.metrics_path
    ))
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn shutdown_signal() {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(error) => {
                error!(%error, "failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
