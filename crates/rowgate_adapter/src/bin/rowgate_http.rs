#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use rowgate_adapter::{
    http, runtime_from_config, Backend, BackendConfig, GatewayConfig, GatewayError,
    DEFAULT_INSTANCE_ID, DEFAULT_TABLE_ID,
};
use rowgate_bigtable::config::{
    DEFAULT_ADMIN_ENDPOINT, DEFAULT_DATA_ENDPOINT, DEFAULT_METADATA_ENDPOINT, DEFAULT_TIMEOUT_MS,
};
use rowgate_bigtable::{BigtableConfig, CredentialSource};
use rowgate_contracts::table::{InstanceId, ProjectId, TableId};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str =
    "rowgate_http=info,rowgate_adapter=info,rowgate_bigtable=info,rowgate_storage=info,tower_http=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    Bigtable,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// HTTP gateway over a wide-column row store
#[derive(Parser, Debug)]
#[command(name = "rowgate_http")]
struct Args {
    /// Listen address
    #[arg(long, env = "ROWGATE_HTTP_BIND", default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

    /// Storage backend
    #[arg(long, env = "ROWGATE_BACKEND", value_enum, default_value_t = BackendKind::Bigtable)]
    backend: BackendKind,

    /// Google Cloud project that owns the Bigtable instance
    #[arg(long, env = "GOOGLE_CLOUD_PROJECT")]
    project: Option<String>,

    #[arg(long, env = "ROWGATE_BIGTABLE_INSTANCE", default_value = DEFAULT_INSTANCE_ID)]
    instance: String,

    #[arg(long, env = "ROWGATE_BIGTABLE_TABLE", default_value = DEFAULT_TABLE_ID)]
    table: String,

    #[arg(long, env = "ROWGATE_BIGTABLE_ADMIN_ENDPOINT", default_value = DEFAULT_ADMIN_ENDPOINT)]
    admin_endpoint: String,

    #[arg(long, env = "ROWGATE_BIGTABLE_DATA_ENDPOINT", default_value = DEFAULT_DATA_ENDPOINT)]
    data_endpoint: String,

    #[arg(long, env = "ROWGATE_METADATA_ENDPOINT", default_value = DEFAULT_METADATA_ENDPOINT)]
    metadata_endpoint: String,

    /// Per-call connect/read/write timeout for the storage client
    #[arg(long, env = "ROWGATE_BIGTABLE_TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout_ms: u32,

    /// OAuth access token; the metadata server is used when absent
    #[arg(long, env = "ROWGATE_BIGTABLE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Send no credentials (emulators, auth proxies)
    #[arg(long, env = "ROWGATE_BIGTABLE_ANONYMOUS")]
    anonymous: bool,

    /// GC sweep interval for the memory backend
    #[arg(long, env = "ROWGATE_MEMORY_GC_INTERVAL_MS", default_value_t = 60_000)]
    memory_gc_interval_ms: u64,

    #[arg(long, env = "ROWGATE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Args {
    fn gateway_config(&self) -> Result<GatewayConfig, GatewayError> {
        let table = TableId::new(self.table.as_str())
            .map_err(|v| GatewayError::Config(v.to_string()))?;
        let backend = match self.backend {
            BackendKind::Memory => BackendConfig::InMemory,
            BackendKind::Bigtable => BackendConfig::Bigtable(self.bigtable_config()?),
        };
        Ok(GatewayConfig { table, backend })
    }

    fn bigtable_config(&self) -> Result<BigtableConfig, GatewayError> {
        let project = self.project.as_deref().ok_or_else(|| {
            GatewayError::Config(
                "--project / GOOGLE_CLOUD_PROJECT is required for the bigtable backend"
                    .to_string(),
            )
        })?;
        let project_id =
            ProjectId::new(project).map_err(|v| GatewayError::Config(v.to_string()))?;
        let instance_id = InstanceId::new(self.instance.as_str())
            .map_err(|v| GatewayError::Config(v.to_string()))?;

        let mut config = BigtableConfig::new(project_id, instance_id);
        config.admin_endpoint = self.admin_endpoint.clone();
        config.data_endpoint = self.data_endpoint.clone();
        config.metadata_endpoint = self.metadata_endpoint.clone();
        config.timeout_ms = self.timeout_ms;
        config.credentials = match (&self.access_token, self.anonymous) {
            (_, true) => CredentialSource::Anonymous,
            (Some(token), false) => CredentialSource::StaticToken(token.clone()),
            (None, false) => CredentialSource::MetadataServer,
        };
        Ok(config)
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

fn spawn_memory_gc_worker(backend: &Backend, interval_ms: u64) {
    let Backend::InMemory(store) = backend else {
        return;
    };
    let store = store.clone();
    let interval = Duration::from_millis(interval_ms.max(100));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let store = store.clone();
            match tokio::task::spawn_blocking(move || store.collect_garbage()).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!(error = %err, "memory gc pass failed"),
                Err(err) => warn!(error = %err, "memory gc task failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let config = args.gateway_config()?;
    let (runtime, backend) = runtime_from_config(&config)?;
    info!(
        backend = backend.name(),
        table = %runtime.table(),
        "gateway runtime ready"
    );
    spawn_memory_gc_worker(&backend, args.memory_gc_interval_ms);

    let app = http::router(Arc::new(runtime));
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
