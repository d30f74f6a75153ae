//! Caller-facing probers
//!
//! One prober issues a sequence of probes to a single destination at a fixed
//! cadence and folds the terminal events into running statistics. Probers
//! are plain async calls; the engine only tracks how many are active so
//! shutdown can wait for them.

use rand::Rng;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use pingmesh_net::{build_echo_request, Family, IcmpSocket, ECHO_HEADER_LEN};

use crate::engine::{DestChannels, Engine, ProberGuard};
use crate::expirer;
use crate::probe::{canonical_ip, Probe};
use crate::results::{PingResults, RunningStats};

impl Engine {
    /// Issue `count` probes to `ip`, one per `interval`, and return the
    /// aggregate statistics. Blocks the calling task until every probe has
    /// reached a terminal event, or `cancel`/engine shutdown stops the run
    /// early.
    ///
    /// # Panics
    ///
    /// Panics if the engine has not been started or if another prober is
    /// already active for `ip` (sequence numbers would collide).
    pub async fn ping(
        &self,
        ip: IpAddr,
        count: u16,
        interval: Duration,
        sort_rtts: bool,
        cancel: CancellationToken,
    ) -> PingResults {
        self.ping_with_drop_probability(ip, count, interval, sort_rtts, cancel, 0.0)
            .await
    }

    /// [`ping`](Engine::ping) which additionally drops each probe in the
    /// sender with probability `drop_probability`. The probe still enters
    /// the index, so the expirer times it out genuinely; this models packet
    /// loss without kernel involvement.
    pub async fn ping_with_drop_probability(
        &self,
        ip: IpAddr,
        count: u16,
        interval: Duration,
        sort_rtts: bool,
        cancel: CancellationToken,
        drop_probability: f64,
    ) -> PingResults {
        let ip = canonical_ip(ip);
        let family = Family::of(ip);
        let fake_success = self.shared.config.fake_success;
        let timeout = self.shared.config.timeout;

        let (success_tx, mut success_rx) = mpsc::channel(count.max(1) as usize);
        let (expired_tx, mut expired_rx) = mpsc::channel(count.max(1) as usize);

        // Register the destination channels and grab this run's collaborators
        // in one critical section.
        let (socket, prober_shutdown) = {
            let mut state = self.shared.state.write();
            assert!(state.started, "ping() on an engine that was not started");
            assert!(
                !state.channels.contains_key(&ip),
                "destination {ip} already has an active prober"
            );
            state.channels.insert(
                ip,
                DestChannels {
                    success_tx,
                    expired_tx,
                },
            );
            let socket = state.sockets.as_ref().map(|pair| pair.socket(family));
            (socket, state.prober_shutdown.clone())
        };
        let _guard = ProberGuard::register(&self.shared);

        debug!(%ip, count, ?interval, drop_probability, "prober started");
        let started = Instant::now();
        let mut stats = RunningStats::new(count);
        let mut keep_looping = true;

        for i in 0..count {
            let iteration_started = Instant::now();
            let fake_drop = draw_fake_drop(drop_probability);

            // Wire bytes are skipped in fake-success mode unless the drop
            // draw hit; a dropped probe still models a real send attempt.
            let mut wire = [0u8; ECHO_HEADER_LEN];
            let wire_len = if !fake_success || fake_drop {
                // An 8-byte header always fits the 8-byte buffer.
                Some(
                    build_echo_request(family, &mut wire, self.shared.identifier, i)
                        .expect("echo header fits the wire buffer"),
                )
            } else {
                None
            };

            {
                let mut state = self.shared.state.write();
                // Stamped after lock acquisition so queueing delay counts
                // against the deadline budget.
                let sent_at = Instant::now();
                state.index.insert(Probe {
                    ip,
                    seq: i,
                    sent_at,
                    deadline: sent_at + timeout,
                    fake_drop,
                });
                expirer::ensure_running(&self.shared, &mut state);
            }

            if !fake_success && !fake_drop {
                if let (Some(len), Some(socket)) = (wire_len, socket.as_deref()) {
                    send_probe(socket, &wire[..len], ip).await;
                }
            }

            tokio::select! {
                Some(success) = success_rx.recv() => {
                    trace!(%ip, i, seq = success.seq, rtt = ?success.rtt, "success");
                    stats.record_success(i, &success);
                }
                Some(expired) = expired_rx.recv() => {
                    debug!(
                        %ip, i,
                        seq = expired.seq,
                        waited = ?expired.sent_at.elapsed(),
                        "probe timed out after {timeout:?}"
                    );
                    stats.record_failure();
                }
                _ = cancel.cancelled() => {
                    debug!(%ip, i, "prober cancelled by caller");
                    keep_looping = false;
                }
                _ = prober_shutdown.cancelled() => {
                    debug!(%ip, i, "prober stopped by engine shutdown");
                    keep_looping = false;
                }
            }

            if !keep_looping {
                break;
            }

            // Hold the cadence: sleep whatever the iteration left over.
            if i + 1 < count {
                let sleep_for = interval.saturating_sub(iteration_started.elapsed());
                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    _ = cancel.cancelled() => break,
                    _ = prober_shutdown.cancelled() => break,
                }
            }
        }

        let results = stats.finish(ip, started.elapsed(), sort_rtts);
        debug!(
            %ip,
            successes = results.successes,
            failures = results.failures,
            out_of_order = results.out_of_order,
            "prober finished"
        );

        // Tear down this destination: channels out of the map, residual
        // probes (cancelled runs leave them) out of the index.
        {
            let mut state = self.shared.state.write();
            state.channels.remove(&ip);
            let residual = state.index.remove_destination(ip);
            if residual > 0 {
                debug!(%ip, residual, "dropped residual probes at prober exit");
            }
        }

        results
    }

    /// [`ping`](Engine::ping) for fan-out: the result is sent on `out`
    /// instead of returned, so callers can spawn one prober per destination
    /// and collect from a single channel.
    pub async fn ping_to_channel(
        &self,
        ip: IpAddr,
        count: u16,
        interval: Duration,
        sort_rtts: bool,
        cancel: CancellationToken,
        out: mpsc::Sender<PingResults>,
    ) {
        let results = self.ping(ip, count, interval, sort_rtts, cancel).await;
        if out.send(results).await.is_err() {
            warn!(%ip, "ping results receiver dropped");
        }
    }
}

/// Bernoulli draw for the sender-side drop.
fn draw_fake_drop(drop_probability: f64) -> bool {
    drop_probability > 0.0 && rand::thread_rng().gen::<f64>() >= 1.0 - drop_probability
}

/// Write the probe to the socket. `ENOBUFS` means the kernel is overcommitted
/// and back-pressure is unsupported, so it is fatal; any other write error is
/// logged and the probe ages out through the expirer.
async fn send_probe(socket: &IcmpSocket, bytes: &[u8], ip: IpAddr) {
    let target = SocketAddr::new(ip, 0);
    match socket.send_to(bytes, &target).await {
        Ok(written) if written == bytes.len() => {
            trace!(%ip, written, "echo request sent");
        }
        Ok(written) => {
            error!(%ip, written, expected = bytes.len(), "short ICMP write");
            std::process::exit(1);
        }
        Err(e) if e.raw_os_error() == Some(libc::ENOBUFS) => {
            error!(%ip, error = %e, "kernel out of buffer space (ENOBUFS)");
            std::process::exit(1);
        }
        Err(e) => {
            warn!(%ip, error = %e, "echo request write failed, probe will time out");
        }
    }
}
