use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use argh::FromArgs;
use color_eyre::eyre::{bail, eyre};
use color_eyre::Result;

use slurm_exporter::args::Args;
use slurm_exporter::server::Exporter;
use slurm_exporter::slurm::{Source, Tool};

/// Returns canned output for each command line
#[derive(Default)]
struct Canned {
    outputs: HashMap<String, String>,
}

impl Canned {
    fn with(mut self, tool: Tool, args: &str, output: &str) -> Self {
        self.outputs
            .insert(format!("{} {}", tool, args), output.to_string());
        self
    }

    fn cluster() -> Self {
        Canned::default()
            .with(Tool::Sinfo, "-h -o%R,%C", "gpu,10/5/0/15\nmain,100/20/4/124\nempty,0/0/0/0\n")
            .with(
                Tool::Squeue,
                "-a -r -h -o%P --states=RUNNING",
                "main\nmain\ngpu\n",
            )
            .with(
                Tool::Squeue,
                "-a -r -h -o%P --states=PENDING",
                "main\nunknown\n",
            )
            .with(
                Tool::Squeue,
                "-a -r -h -o%q,%C --states=RUNNING",
                "normal,4\nnormal,8\n,2\n",
            )
            .with(
                Tool::Squeue,
                "-a -r -h -o%q --states=PENDING",
                "long\n",
            )
            .with(
                Tool::Sshare,
                "-n -P -o user,account,fairshare -U -a",
                "alice|teamA|0.5\n  alice|teamA|0.9\nbob|teamB|0.000000\n",
            )
    }
}

impl Source for Canned {
    fn query(&self, tool: Tool, args: &[String]) -> Result<String> {
        let key = format!("{} {}", tool, args.join(" "));
        self.outputs
            .get(&key)
            .cloned()
            .ok_or_else(|| eyre!("{:?} failed with exit status: 1", key))
    }
}

/// Fails the first `sinfo` call, then behaves like the wrapped [`Canned`]
struct Flaky {
    canned: Canned,
    calls: AtomicUsize,
    /// Holds the first two `sinfo` calls until both have started
    barrier: Option<Barrier>,
}

impl Flaky {
    fn new(barrier: Option<Barrier>) -> Self {
        Self {
            canned: Canned::cluster(),
            calls: AtomicUsize::new(0),
            barrier,
        }
    }
}

impl Source for Flaky {
    fn query(&self, tool: Tool, args: &[String]) -> Result<String> {
        if tool == Tool::Sinfo {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(barrier) = &self.barrier {
                if call < 2 {
                    barrier.wait();
                }
            }

            if call == 0 {
                bail!("sinfo: error: Unable to contact slurm controller");
            }
        }

        self.canned.query(tool, args)
    }
}

fn args(args: &[&str]) -> Args {
    Args::from_args(&["slurm-exporter"], args).unwrap()
}

fn series(text: &str) -> Vec<&str> {
    let mut lines = text
        .lines()
        .filter(|line| !line.starts_with('#'))
        .collect::<Vec<_>>();
    lines.sort_unstable();
    lines
}

#[test]
fn test_render_cluster() {
    let exporter = Exporter::new(Arc::new(Canned::cluster()), &args(&[])).unwrap();
    let text = exporter.render().unwrap();

    assert_eq!(
        series(&text),
        vec![
            "slurm_partition_cpus_allocated{partition=\"gpu\"} 10",
            "slurm_partition_cpus_allocated{partition=\"main\"} 100",
            "slurm_partition_cpus_idle{partition=\"gpu\"} 5",
            "slurm_partition_cpus_idle{partition=\"main\"} 20",
            "slurm_partition_cpus_other{partition=\"main\"} 4",
            "slurm_partition_cpus_total{partition=\"gpu\"} 15",
            "slurm_partition_cpus_total{partition=\"main\"} 124",
            "slurm_partition_jobs_pending{partition=\"main\"} 1",
            "slurm_partition_jobs_running{partition=\"gpu\"} 1",
            "slurm_partition_jobs_running{partition=\"main\"} 2",
            "slurm_partition_jobs_total{partition=\"gpu\"} 1",
            "slurm_partition_jobs_total{partition=\"main\"} 3",
            "slurm_qos_cpus_allocated{qos=\"normal\"} 12",
            "slurm_qos_jobs_pending{qos=\"long\"} 1",
            "slurm_qos_jobs_running{qos=\"normal\"} 2",
            "slurm_qos_jobs_total{qos=\"long\"} 1",
            "slurm_qos_jobs_total{qos=\"normal\"} 2",
            "slurm_user_fairshare{account=\"teamA\",user=\"alice\"} 0.5",
        ]
    );

    assert!(text.contains("# HELP slurm_partition_cpus_allocated Allocated CPUs for partition"));
    assert!(text.contains("# TYPE slurm_user_fairshare gauge"));
    assert!(!text.contains("unknown"));
    assert!(!text.contains("empty"));
}

#[test]
fn test_fairshare_accounts_and_disable() {
    let source = Canned::cluster().with(
        Tool::Sshare,
        "-n -P -o user,account,fairshare -U -a -A qchem,photonics",
        "carol|qchem|0.25\n",
    );
    let exporter = Exporter::new(
        Arc::new(source),
        &args(&["--account", "qchem", "--account", "photonics"]),
    )
    .unwrap();
    let text = exporter.render().unwrap();

    assert!(text.contains("slurm_user_fairshare{account=\"qchem\",user=\"carol\"} 0.25"));
    assert!(!text.contains("alice"));

    let exporter = Exporter::new(Arc::new(Canned::cluster()), &args(&["--no-fairshare"])).unwrap();
    let text = exporter.render().unwrap();

    assert!(!text.contains("slurm_user_fairshare"));
    assert!(text.contains("slurm_qos_jobs_total"));
}

#[test]
fn test_failed_command_fails_scrape() {
    // `sshare` fails, but partitions and QoS are collected fine
    let mut source = Canned::cluster();
    source
        .outputs
        .retain(|key, _| !key.starts_with("sshare"));

    let exporter = Exporter::new(Arc::new(source), &args(&[])).unwrap();
    let err = exporter.gather().unwrap_err();
    assert!(format!("{:?}", err).contains("collecting fairshare metrics"));
}

#[test]
fn test_failure_is_not_carried_over() {
    let exporter = Exporter::new(Arc::new(Flaky::new(None)), &args(&[])).unwrap();

    let err = exporter.gather().unwrap_err();
    assert!(format!("{:?}", err).contains("collecting partitions metrics"));

    let families = exporter.gather().unwrap();
    assert!(families
        .iter()
        .any(|family| family.get_name() == "slurm_partition_cpus_total"));
}

#[test]
fn test_concurrent_scrapes_fail_independently() {
    let exporter = Exporter::new(Arc::new(Flaky::new(Some(Barrier::new(2)))), &args(&[])).unwrap();

    let results = thread::scope(|scope| {
        let first = scope.spawn(|| exporter.render());
        let second = scope.spawn(|| exporter.render());
        [first.join().unwrap(), second.join().unwrap()]
    });

    let (failed, succeeded): (Vec<_>, Vec<_>) = results.into_iter().partition(|r| r.is_err());
    assert_eq!(failed.len(), 1);
    assert_eq!(succeeded.len(), 1);

    let err = failed.into_iter().next().unwrap().unwrap_err();
    assert!(format!("{:?}", err).contains("Unable to contact slurm controller"));

    let text = succeeded.into_iter().next().unwrap().unwrap();
    assert!(text.contains("slurm_partition_cpus_total{partition=\"gpu\"} 15"));
    assert!(text.contains("slurm_qos_jobs_total{qos=\"normal\"} 2"));
}

#[test]
fn test_idle_cluster_exports_nothing() {
    let source = Canned::default()
        .with(Tool::Sinfo, "-h -o%R,%C", "idle,0/0/0/0\n")
        .with(Tool::Squeue, "-a -r -h -o%P --states=RUNNING", "")
        .with(Tool::Squeue, "-a -r -h -o%P --states=PENDING", "")
        .with(Tool::Squeue, "-a -r -h -o%q,%C --states=RUNNING", "")
        .with(Tool::Squeue, "-a -r -h -o%q --states=PENDING", "")
        .with(Tool::Sshare, "-n -P -o user,account,fairshare -U -a", "");

    let exporter = Exporter::new(Arc::new(source), &args(&[])).unwrap();

    assert!(exporter.gather().unwrap().is_empty());
    assert_eq!(exporter.render().unwrap(), "");
}
