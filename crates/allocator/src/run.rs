use {
    crate::{
        arguments::Arguments,
        domain::{Coordinator, Resolver, clock},
        infra::{self, Configuration},
        shutdown_controller::ShutdownController,
        sweeper::{Liveness, Sweeper},
    },
    anyhow::Context,
    clap::Parser,
    database::leader_pg_lock::LeaderLock,
    sqlx::PgPool,
    std::sync::Arc,
};

pub async fn start(args: impl Iterator<Item = String>) {
    let args = Arguments::parse_from(args);
    let obs_config = observe::Config::new(
        args.log_filter.as_str(),
        args.log_stderr_threshold,
        args.use_json_logs,
    );
    observe::tracing::initialize(&obs_config);
    tracing::info!("running allocator with validated arguments:\n{}", args);
    observe::metrics::setup_registry(Some("stall_allocation".into()), None);

    if let Err(err) = run(args).await {
        tracing::error!(?err, "allocator failed");
        std::process::exit(1);
    }
}

/// Assumes tracing and metrics registry have already been set up.
pub async fn run(args: Arguments) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => Configuration::from_path(path).await?,
        None => Configuration::default(),
    }
    .validate()?;
    tracing::info!(?config, "loaded configuration");

    let pool = PgPool::connect(args.db_url.as_str())
        .await
        .context("failed to connect to postgres")?;

    let resolver = match config.raffle_seed {
        Some(seed) => {
            tracing::warn!(seed, "raffle draws are seeded and therefore predictable");
            Resolver::seeded(seed)
        }
        None => Resolver::from_entropy(),
    };
    let coordinator = Arc::new(Coordinator::new(
        Arc::new(infra::persistence::Postgres::new(pool.clone())),
        Arc::new(infra::eligibility::Postgres::new(pool.clone())),
        Arc::new(infra::notify::Postgres::new(
            pool.clone(),
            config.notification_channel.clone(),
        )),
        Arc::new(clock::System::default()),
        resolver,
        config.max_conflict_retries,
    ));

    let liveness = Arc::new(Liveness::new(config.sweep_interval * 10));
    observe::metrics::serve_metrics(liveness.clone(), args.metrics_address);

    let leader = LeaderLock::new(
        pool,
        config.leader_lock_key.clone(),
        config.leader_lock_retry,
    );
    Sweeper::new(
        coordinator,
        Some(leader),
        config.sweep_interval,
        liveness,
    )
    .run_until_shutdown(ShutdownController::default())
    .await;
    Ok(())
}
