use std::collections::HashMap;
use std::sync::Arc;

use color_eyre::Result;
use serde::Deserialize;
use tracing::trace;

use crate::collector::{GaugeSpec, Pipeline};

use super::misc::{lenient_f64, reader};
use super::{Source, Tool};

/// A line of `sshare -P -o user,account,fairshare` output
#[derive(Debug, Deserialize)]
struct ShareRow {
    user: String,
    account: String,
    #[serde(deserialize_with = "lenient_f64")]
    fairshare: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UserAccount {
    pub user: String,
    pub account: String,
}

impl UserAccount {
    pub fn new(user: &str, account: &str) -> Self {
        Self {
            user: user.to_string(),
            account: account.to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FairShareMetrics {
    pub fairshare: f64,
}

/// Fair-share factor per user and account
pub struct FairShare {
    source: Arc<dyn Source>,
    /// Accounts passed to `sshare -A`; all accounts if empty
    accounts: Vec<String>,
}

impl FairShare {
    pub fn new(source: Arc<dyn Source>, accounts: Vec<String>) -> Self {
        Self { source, accounts }
    }

    /// Queries `sshare` and collects the fair-share factor of every user association
    pub fn collect(
        source: &dyn Source,
        accounts: &[String],
    ) -> Result<HashMap<UserAccount, FairShareMetrics>> {
        let output = source.query(Tool::Sshare, &sshare_args(accounts))?;

        Ok(Self::parse(&output))
    }

    /// Parses `sshare -P` output. Indented lines describe nested associations and are
    /// ignored; a repeated user/account pair replaces the earlier value
    pub fn parse(text: &str) -> HashMap<UserAccount, FairShareMetrics> {
        let top_level = text
            .lines()
            .filter(|line| !line.starts_with(char::is_whitespace))
            .collect::<Vec<_>>()
            .join("\n");

        let mut metrics = HashMap::new();
        for record in reader(&top_level, b'|', true).records().flatten() {
            if record.len() != 3 {
                trace!(?record, "skipping sshare line");
                continue;
            }

            match record.deserialize::<ShareRow>(None) {
                Ok(row) if row.user.is_empty() || row.account.is_empty() => {
                    trace!(?record, "skipping sshare line without user or account")
                }
                Ok(row) => {
                    let key = UserAccount {
                        user: row.user,
                        account: row.account,
                    };

                    metrics.insert(
                        key,
                        FairShareMetrics {
                            fairshare: row.fairshare,
                        },
                    );
                }
                Err(error) => trace!(?record, %error, "skipping sshare line"),
            }
        }

        metrics
    }
}

fn sshare_args(accounts: &[String]) -> Vec<String> {
    let mut args = ["-n", "-P", "-o", "user,account,fairshare", "-U", "-a"]
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>();

    if !accounts.is_empty() {
        args.push("-A".to_string());
        args.push(accounts.join(","));
    }

    args
}

impl Pipeline for FairShare {
    type Key = UserAccount;
    type Record = FairShareMetrics;

    const NAME: &'static str = "fairshare";
    const LABELS: &'static [&'static str] = &["user", "account"];
    const GAUGES: &'static [GaugeSpec<FairShareMetrics>] = &[GaugeSpec {
        name: "slurm_user_fairshare",
        help: "FairShare for user",
        value: |m| m.fairshare,
    }];

    fn compute(&self) -> Result<HashMap<UserAccount, FairShareMetrics>> {
        Self::collect(self.source.as_ref(), &self.accounts)
    }

    fn label_values(key: &UserAccount) -> Vec<&str> {
        vec![key.user.as_str(), key.account.as_str()]
    }
}
