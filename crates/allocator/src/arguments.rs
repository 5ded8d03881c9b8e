use {
    std::{net::SocketAddr, path::PathBuf},
    tracing::Level,
    url::Url,
};

#[derive(clap::Parser)]
pub struct Arguments {
    #[clap(long, env, default_value = "warn,allocator=debug,database=debug")]
    pub log_filter: String,

    #[clap(long, env, default_value = "error")]
    pub log_stderr_threshold: Level,

    /// Emit log lines as JSON.
    #[clap(long, env)]
    pub use_json_logs: bool,

    #[clap(long, env, default_value = "0.0.0.0:9590")]
    pub metrics_address: SocketAddr,

    /// Url of the Postgres database. By default connects to locally running
    /// postgres.
    #[clap(long, env, default_value = "postgresql://")]
    pub db_url: Url,

    /// Path to the TOML configuration. Defaults apply when omitted.
    #[clap(long, env)]
    pub config: Option<PathBuf>,
}

impl std::fmt::Display for Arguments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            log_filter,
            log_stderr_threshold,
            use_json_logs,
            metrics_address,
            db_url: _,
            config,
        } = self;

        writeln!(f, "log_filter: {log_filter}")?;
        writeln!(f, "log_stderr_threshold: {log_stderr_threshold}")?;
        writeln!(f, "use_json_logs: {use_json_logs}")?;
        writeln!(f, "metrics_address: {metrics_address}")?;
        writeln!(f, "db_url: SECRET")?;
        writeln!(f, "config: {config:?}")?;
        Ok(())
    }
}
