//! Minimal latency monitor built on the echo engine
//!
//! Pings the v4 and v6 loopbacks concurrently and prints per-destination
//! statistics.
//!
//! Usage: cargo run --example monitor
//!
//! Requires non-privileged ICMP sockets: the process gid must fall inside
//! net.ipv4.ping_group_range (sudo sysctl -w
//! net.ipv4.ping_group_range="0 2147483647").

use pingmesh_engine::{Engine, EngineConfig};
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .compact()
        .init();

    let targets: Vec<IpAddr> = vec!["127.0.0.1".parse()?, "::1".parse()?];

    let engine = Engine::new(EngineConfig {
        timeout: Duration::from_millis(500),
        read_deadline: Duration::from_millis(250),
        ..EngineConfig::default()
    });
    engine.start()?;

    let shutdown = engine.shutdown_token();
    let runner = tokio::spawn({
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        async move { engine.run(shutdown).await }
    });

    let (tx, mut rx) = mpsc::channel(targets.len());
    for ip in &targets {
        let engine = engine.clone();
        let ip = *ip;
        let tx = tx.clone();
        tokio::spawn(async move {
            engine
                .ping_to_channel(
                    ip,
                    10,
                    Duration::from_millis(200),
                    true,
                    CancellationToken::new(),
                    tx,
                )
                .await;
        });
    }
    drop(tx);

    while let Some(results) = rx.recv().await {
        println!(
            "[{}] {}/{} replies, {} lost, min={:?} mean={:?} max={:?}",
            results.ip,
            results.successes,
            results.count,
            results.failures,
            results.min,
            results.mean,
            results.max,
        );
    }

    shutdown.cancel();
    runner.await?;
    Ok(())
}
