//! Concurrent ICMP echo engine
//!
//! A long-lived component for latency-monitoring daemons: it issues Echo
//! Requests to many destinations concurrently over non-privileged ICMP
//! datagram sockets, correlates replies with outstanding probes, enforces
//! per-probe timeouts, and hands each caller aggregate RTT statistics.
//!
//! The moving parts are a shared index of in-flight probes keyed by
//! `(destination, sequence)`, a group of receivers per address family
//! demultiplexing the shared sockets, and a single on-demand expirer that
//! always sleeps until the earliest outstanding deadline. Every probe gets
//! exactly one terminal event, success or expired, regardless of how the
//! reply races the deadline.
//!
//! ```no_run
//! use pingmesh_engine::{Engine, EngineConfig};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let engine = Engine::new(EngineConfig::default());
//! engine.start()?;
//!
//! let shutdown = engine.shutdown_token();
//! tokio::spawn({
//!     let engine = engine.clone();
//!     let shutdown = shutdown.clone();
//!     async move { engine.run(shutdown).await }
//! });
//!
//! let results = engine
//!     .ping(
//!         "192.0.2.1".parse()?,
//!         10,
//!         Duration::from_millis(100),
//!         true,
//!         CancellationToken::new(),
//!     )
//!     .await;
//! println!("{}/{} replies", results.successes, results.count);
//!
//! shutdown.cancel();
//! # Ok(())
//! # }
//! ```
//!
//! Contract violations — starting a started engine, pinging before start,
//! or running two probers against one destination — panic rather than
//! returning an error: they indicate a broken caller, not a runtime fault.

pub mod config;
mod engine;
mod error;
mod expirer;
mod index;
mod probe;
mod prober;
mod receiver;
mod results;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{Error, Result};
pub use results::PingResults;
