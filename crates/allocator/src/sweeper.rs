//! Periodically resolves listings whose deadline has passed so that no
//! listing stays active just because nobody looked at it.

use {
    crate::{
        domain::{Coordinator, Resolution},
        shutdown_controller::ShutdownController,
    },
    database::leader_pg_lock::LeaderLock,
    observe::metrics::LivenessChecking,
    std::{
        sync::{Arc, PoisonError, RwLock},
        time::{Duration, Instant},
    },
    tokio::time,
    tracing::Instrument,
};

/// Considers the sweeper dead once the leader has not finished a sweep for a
/// while.
pub struct Liveness {
    max_sweep_age: Duration,
    /// `None` while this instance is not the leader.
    last_sweep: RwLock<Option<Instant>>,
}

impl Liveness {
    pub fn new(max_sweep_age: Duration) -> Self {
        Self {
            max_sweep_age,
            last_sweep: RwLock::new(None),
        }
    }

    fn swept(&self) {
        *self.last_sweep.write().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    fn standby(&self) {
        *self.last_sweep.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[async_trait::async_trait]
impl LivenessChecking for Liveness {
    async fn is_alive(&self) -> bool {
        match *self.last_sweep.read().unwrap_or_else(PoisonError::into_inner) {
            Some(last) => last.elapsed() <= self.max_sweep_age,
            None => true,
        }
    }
}

pub struct Sweeper {
    coordinator: Arc<Coordinator>,
    /// Without a lock every sweep runs, which is only safe when there is a
    /// single instance.
    leader: Option<LeaderLock>,
    interval: Duration,
    liveness: Arc<Liveness>,
}

impl Sweeper {
    pub fn new(
        coordinator: Arc<Coordinator>,
        leader: Option<LeaderLock>,
        interval: Duration,
        liveness: Arc<Liveness>,
    ) -> Self {
        Self {
            coordinator,
            leader,
            interval,
            liveness,
        }
    }

    /// Sweeps every `interval` until the shutdown signal arrives, then gives
    /// up the leader lock.
    pub async fn run_until_shutdown(mut self, mut shutdown: ShutdownController) {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = interval.tick() => self.tick().await,
            }
        }
        if let Some(leader) = self.leader.as_mut() {
            leader.step_down().await;
        }
        tracing::info!("sweeper stopped");
    }

    async fn tick(&mut self) {
        let is_leader = match self.leader.as_mut() {
            None => true,
            Some(leader) => match leader.tick().await {
                Ok(is_leader) => is_leader,
                Err(err) => {
                    tracing::warn!(?err, "failed to check leader lock");
                    false
                }
            },
        };
        if !is_leader {
            self.liveness.standby();
            return;
        }

        let timer = Metrics::get().sweep_seconds.start_timer();
        let result = self
            .coordinator
            .sweep_expired()
            .instrument(tracing::info_span!("sweep"))
            .await;
        timer.observe_duration();
        match result {
            Ok(resolutions) => {
                let resolved = resolutions
                    .iter()
                    .filter(|resolution| matches!(resolution, Resolution::Resolved(_)))
                    .count();
                if resolved > 0 {
                    tracing::info!(count = resolved, "swept expired listings");
                }
                self.liveness.swept();
            }
            Err(err) => tracing::error!(?err, "failed to sweep expired listings"),
        }
    }
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "allocation")]
struct Metrics {
    /// Time spent per sweep.
    sweep_seconds: prometheus::Histogram,
}

impl Metrics {
    fn get() -> &'static Self {
        Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}
