use {
    anyhow::{anyhow, ensure},
    serde::{Deserialize, Serialize},
    std::{path::Path, time::Duration},
};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Configuration {
    /// How often the sweeper looks for listings whose deadline has passed.
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    pub sweep_interval: Duration,

    /// How often a submission or resolution is retried after losing a race
    /// against a concurrent transaction.
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: usize,

    /// Seed for raffle draws. Only meant for reproducing a run; draws come
    /// from the operating system's entropy source when unset.
    #[serde(default)]
    pub raffle_seed: Option<u64>,

    /// Postgres channel resolution outcomes are published on.
    #[serde(default = "default_notification_channel")]
    pub notification_channel: String,

    /// Name of the advisory lock that elects the instance running sweeps.
    #[serde(default = "default_leader_lock_key")]
    pub leader_lock_key: String,

    /// How often a standby instance tries to take over the leader lock.
    #[serde(with = "humantime_serde", default = "default_leader_lock_retry")]
    pub leader_lock_retry: Duration,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            sweep_interval: default_sweep_interval(),
            max_conflict_retries: default_max_conflict_retries(),
            raffle_seed: None,
            notification_channel: default_notification_channel(),
            leader_lock_key: default_leader_lock_key(),
            leader_lock_retry: default_leader_lock_retry(),
        }
    }
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_conflict_retries() -> usize {
    3
}

fn default_notification_channel() -> String {
    "allocation_outcomes".to_string()
}

fn default_leader_lock_key() -> String {
    "allocation_sweeper".to_string()
}

fn default_leader_lock_retry() -> Duration {
    Duration::from_secs(30)
}

impl Configuration {
    pub async fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        match toml::from_str(&tokio::fs::read_to_string(&path).await?) {
            Ok(self_) => Ok(self_),
            Err(err) if std::env::var("TOML_TRACE_ERROR").is_ok_and(|v| v == "1") => Err(anyhow!(
                "failed to parse TOML config at {}: {err:#?}",
                path.as_ref().display()
            )),
            Err(_) => Err(anyhow!(
                "failed to parse TOML config at: {}. Set TOML_TRACE_ERROR=1 to print parsing \
                 error but this may leak secrets.",
                path.as_ref().display()
            )),
        }
    }

    pub fn validate(self) -> anyhow::Result<Self> {
        ensure!(
            !self.sweep_interval.is_zero(),
            "sweep-interval must be positive"
        );
        ensure!(
            !self.notification_channel.is_empty(),
            "notification-channel must not be empty"
        );
        ensure!(
            !self.leader_lock_key.is_empty(),
            "leader-lock-key must not be empty"
        );
        Ok(self)
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Configuration {
    pub fn to_temp_path(&self) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().expect("temp file creation should not fail");
        file.write_all(
            toml::to_string_pretty(self)
                .expect("serialization should not fail")
                .as_bytes(),
        )
        .expect("writing to temp file should not fail");
        file
    }
}
