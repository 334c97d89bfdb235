use std::{net::SocketAddr, sync::Arc};

use axum::{Json, Router, extract::State, routing::get};
use pcap_bus::{Metrics, MetricsSnapshot};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub(crate) fn start_api_server(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                log::error!("metrics endpoint could not bind {}: {}", addr, e);
                return;
            }
        };
        log::info!("metrics endpoint listening on {}", addr);
        serve(listener, metrics, cancel).await;
    });
}

async fn serve(listener: TcpListener, metrics: Arc<Metrics>, cancel: CancellationToken) {
    if let Err(e) = axum::serve(listener, router(metrics))
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await
    {
        log::error!("metrics endpoint failed: {}", e);
    }
}

fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/metrics", get(metrics_snapshot))
        .with_state(metrics)
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("shutting down metrics endpoint");
}

async fn index() -> &'static str {
    "pcap-tshark"
}

async fn metrics_snapshot(State(metrics): State<Arc<Metrics>>) -> Json<MetricsSnapshot> {
    Json(metrics.snapshot())
}
