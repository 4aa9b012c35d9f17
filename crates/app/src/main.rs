use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use esk_apply::KubeObjectApi;
use esk_controller::{run_controller, shutdown_signal, Config, ExitReason};
use esk_kubehub::HttpConnector;
use tracing::{error, info};

fn init_tracing() {
    let env = std::env::var("ESK_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics(addr: Option<&str>) {
    let Some(addr) = addr else { return };
    match addr.parse::<std::net::SocketAddr>() {
        Ok(sock) => match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock).install() {
            Ok(()) => info!(addr = %addr, "Prometheus metrics exporter listening"),
            Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
        },
        Err(_) => tracing::warn!(addr = %addr, "invalid ESK_METRICS_ADDR; expected host:port"),
    }
}

async fn run(cfg: Config) -> anyhow::Result<ExitReason> {
    // No overall timeout: the watch body stays open indefinitely.
    let http = reqwest::Client::builder().connect_timeout(Duration::from_secs(10)).build().context("building watch http client")?;
    // The watch is unauthenticated; ESK_API_BASE must point at a proxy.
    let connector = HttpConnector::new(http, &cfg.api_base, &cfg.resource_path);
    info!(url = %connector.url(), "watching through proxy");

    let client = kube::Client::try_default().await.context("building kube client")?;
    let api = Arc::new(KubeObjectApi::new(client));
    Ok(run_controller(connector, api, &cfg, shutdown_signal()).await)
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    init_tracing();
    let cfg = Config::from_env();
    init_metrics(cfg.metrics_addr.as_deref());
    let code = match run(cfg).await {
        Ok(reason) => reason.exit_code(),
        Err(e) => {
            error!(error = %format!("{:#}", e), "startup failed");
            2
        }
    };
    std::process::exit(code);
}
