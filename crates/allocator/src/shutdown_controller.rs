pub struct ShutdownController {
    shutdown: tokio::sync::oneshot::Receiver<()>,
}

pub struct ShutdownSignal(tokio::sync::oneshot::Sender<()>);

impl ShutdownController {
    /// Creates a new controller which reacts to SIGINT/SIGTERM from the OS.
    pub fn new_shutdown_on_signal() -> Self {
        let (sender, receiver) = tokio::sync::oneshot::channel();
        tokio::spawn(Self::wait_for_signal(ShutdownSignal(sender)));
        Self { shutdown: receiver }
    }

    /// Creates a new controller that can be manually instructed to stop the
    /// sweeper.
    pub fn new_manual_shutdown() -> (ShutdownSignal, Self) {
        let (sender, receiver) = tokio::sync::oneshot::channel();
        (ShutdownSignal(sender), Self { shutdown: receiver })
    }

    async fn wait_for_signal(shutdown: ShutdownSignal) {
        #[cfg(unix)]
        {
            use tokio::{signal, signal::unix};
            let mut sigterm = match unix::signal(unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(err) => {
                    tracing::error!(?err, "failed to install SIGTERM handler");
                    return;
                }
            };

            // Equivalent to SIGINT
            let ctrl_c = signal::ctrl_c();
            tokio::select! {
                _ = ctrl_c => {
                    tracing::info!("Received SIGINT");
                },
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM");
                },
            }
        }
        #[cfg(not(unix))]
        {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(?err, "failed to install CTRL+C handler");
                return;
            }
            tracing::info!("Received SIGINT");
        }

        shutdown.shutdown();
    }

    /// Resolves once the shutdown signal has been received. A dropped signal
    /// counts as received.
    pub async fn wait(&mut self) {
        let _ = (&mut self.shutdown).await;
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new_shutdown_on_signal()
    }
}

impl ShutdownSignal {
    /// Sends the shutdown signal to the associated controller.
    pub fn shutdown(self) {
        if self.0.send(()).is_err() {
            tracing::debug!("shutdown controller already gone");
        }
    }
}
