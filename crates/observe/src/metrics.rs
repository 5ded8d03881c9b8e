use {
    axum::{http::StatusCode, routing::get},
    prometheus::Encoder,
    std::{collections::HashMap, net::SocketAddr, sync::{Arc, OnceLock}},
    tokio::task::{self, JoinHandle},
};

/// Global metrics registry used by all components.
static REGISTRY: OnceLock<prometheus_metric_storage::StorageRegistry> = OnceLock::new();

/// Configure global metrics registry.
///
/// This function allows specifying common prefix that will be added
/// to all metric names, as well as common labels.
///
/// It should be called at most once, before any call to [`get_registry`],
/// ideally at the very beginning of `main`. Later calls are ignored.
///
/// # Panics
///
/// Panics if the registry configuration is invalid.
pub fn setup_registry(prefix: Option<String>, labels: Option<HashMap<String, String>>) {
    let registry = prometheus::Registry::new_custom(prefix, labels)
        .expect("invalid metrics registry configuration");
    let storage_registry = prometheus_metric_storage::StorageRegistry::new(registry);
    if REGISTRY.set(storage_registry).is_err() {
        tracing::warn!("metrics registry was already initialized");
    }
}

/// Get the global instance of the metrics registry.
pub fn get_registry() -> &'static prometheus::Registry {
    get_storage_registry().registry()
}

/// Get the global instance of the metric storage registry.
///
/// If the registry was not configured with [`setup_registry`] it gets
/// initialized with a default value. This keeps unit tests from having to set
/// up a registry before every test.
pub fn get_storage_registry() -> &'static prometheus_metric_storage::StorageRegistry {
    REGISTRY.get_or_init(prometheus_metric_storage::StorageRegistry::default)
}

pub fn encode(registry: &prometheus::Registry) -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&registry.gather(), &mut buffer) {
        tracing::error!(?err, "failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[async_trait::async_trait]
pub trait LivenessChecking: Send + Sync {
    async fn is_alive(&self) -> bool;
}

/// Serves `/metrics` with the encoded prometheus data and `/liveness` which
/// answers 200 or 503 depending on `liveness`.
pub fn serve_metrics(liveness: Arc<dyn LivenessChecking>, address: SocketAddr) -> JoinHandle<()> {
    let app = axum::Router::new()
        .route("/metrics", get(|| async { encode(get_registry()) }))
        .route(
            "/liveness",
            get(move || {
                let liveness = liveness.clone();
                async move {
                    if liveness.is_alive().await {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                }
            }),
        );
    tracing::info!(%address, "serving metrics");
    task::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(address).await {
            Ok(listener) => listener,
            Err(err) => {
                tracing::error!(?err, %address, "failed to bind metrics server");
                return;
            }
        };
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(?err, "metrics server exited");
        }
    })
}
