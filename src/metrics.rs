//! Prometheus metrics for the auto-responder.
//!
//! Exposes:
//! - `autoplus_messages_total` (counter by handler outcome)
//! - `autoplus_listening` (gauge, 1 while the listener is active)
//! - process metrics via `process` collector

use std::convert::Infallible;
use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use prometheus::process_collector::ProcessCollector;
use prometheus::{
    default_registry, register_int_counter_vec, register_int_gauge, Encoder, IntCounterVec,
    IntGauge, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::handler::ReplyOutcome;

static PROCESS_COLLECTOR: Lazy<()> = Lazy::new(|| {
    if let Err(err) = default_registry().register(Box::new(ProcessCollector::for_self())) {
        warn!("Failed to register process collector: {}", err);
    }
});

static MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "autoplus_messages_total",
        "Incoming messages by handler outcome",
        &["outcome"]
    )
    .expect("failed to register messages counter")
});

static LISTENING: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("autoplus_listening", "Whether the listener is active")
        .expect("failed to register listening gauge")
});

/// Ensure collectors are registered.
fn init_collectors() {
    Lazy::force(&PROCESS_COLLECTOR);
    Lazy::force(&MESSAGES_TOTAL);
    Lazy::force(&LISTENING);
}

/// Count one handled message.
pub fn record_outcome(outcome: ReplyOutcome) {
    init_collectors();
    MESSAGES_TOTAL.with_label_values(&[outcome.as_str()]).inc();
}

pub fn set_listening(listening: bool) {
    init_collectors();
    LISTENING.set(i64::from(listening));
}

fn plain_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::from(body));
    *response.status_mut() = status;
    response
}

async fn metrics_response() -> Result<Response<Full<Bytes>>, Infallible> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", err);
        return Ok(plain_response(StatusCode::INTERNAL_SERVER_ERROR, "encode error"));
    }

    let mut response = Response::new(Full::from(buffer));
    if let Ok(content_type) = encoder.format_type().parse() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, content_type);
    }
    Ok(response)
}

async fn handle_request(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    match req.uri().path() {
        "/metrics" => metrics_response().await,
        _ => Ok(plain_response(StatusCode::NOT_FOUND, "")),
    }
}

async fn serve(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Prometheus metrics endpoint started");

    loop {
        let (stream, peer) = listener.accept().await?;
        let service = service_fn(handle_request);
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                warn!(?peer, "Metrics connection error: {}", err);
            }
        });
    }
}

/// Spawn the metrics HTTP endpoint on the given address.
pub fn spawn_metrics_server(addr: SocketAddr) {
    init_collectors();
    tokio::spawn(async move {
        if let Err(err) = serve(addr).await {
            error!(%addr, "Metrics server failed: {}", err);
        }
    });
}
