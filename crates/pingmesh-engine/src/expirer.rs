//! Probe expiry worker
//!
//! A single task that always sleeps until the earliest outstanding deadline.
//! It is born on demand, by the insertion that makes the index non-empty, and
//! dies when the index drains. Only the head probe is ever examined: the
//! index is FIFO with a uniform timeout, so the head deadline is the nearest.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::engine::{Shared, State};
use crate::probe::{PingExpired, PingSuccess, Probe};

/// Spawn the expirer if it is not running, flipping the running flag in the
/// same critical section. The caller holds the engine write lock; two
/// concurrent inserters therefore cannot both spawn. Returns whether this
/// call did the spawn.
pub(crate) fn ensure_running(shared: &Arc<Shared>, state: &mut State) -> bool {
    if state.expirer_running {
        return false;
    }
    state.expirer_running = true;
    let handle = tokio::spawn(run(Arc::clone(shared)));
    state.expirer_handle = Some(handle);
    trace!("expirer spawned");
    true
}

enum Step {
    /// Index empty; the running flag was already cleared under the lock.
    Exit,
    /// Fake-success head was removed; deliver the synthetic success.
    Synthesize(Probe, Option<mpsc::Sender<PingSuccess>>),
    /// Sleep until the head snapshot's deadline, then recheck.
    SleepUntil(Probe),
}

pub(crate) async fn run(shared: Arc<Shared>) {
    let shutdown = shared.state.read().expirer_shutdown.clone();
    debug!("expirer running");

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        // Snapshot the head by value so the lock is released before any
        // sleep; the existence recheck after waking resolves the race with a
        // receiver delivering first.
        let step = {
            let mut state = shared.state.write();
            match state.index.peek_earliest() {
                None => {
                    state.expirer_running = false;
                    Step::Exit
                }
                Some(head) if shared.config.fake_success && !head.fake_drop => {
                    state.index.remove_by_key(head.ip, head.seq);
                    let tx = state
                        .channels
                        .get(&head.ip)
                        .map(|ch| ch.success_tx.clone());
                    Step::Synthesize(head, tx)
                }
                Some(head) => Step::SleepUntil(head),
            }
        };

        match step {
            Step::Exit => {
                debug!("expiry index drained, expirer exiting");
                return;
            }
            Step::Synthesize(head, tx) => {
                let received_at = Instant::now();
                let success = PingSuccess {
                    seq: head.seq,
                    sent_at: head.sent_at,
                    received_at,
                    rtt: received_at.duration_since(head.sent_at),
                };
                deliver_success(tx, head, success);
                continue;
            }
            Step::SleepUntil(head) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(head.deadline.into()) => {}
                    _ = shutdown.cancelled() => break,
                }

                // Key gone means a receiver already delivered; nothing to do.
                if shared.state.read().index.lookup(head.ip, head.seq).is_none() {
                    trace!(ip = %head.ip, seq = head.seq, "probe answered before deadline");
                    continue;
                }

                let tx = {
                    let mut state = shared.state.write();
                    match state.index.remove_by_key(head.ip, head.seq) {
                        Some(_) => state
                            .channels
                            .get(&head.ip)
                            .map(|ch| ch.expired_tx.clone()),
                        // Removed between the recheck and this lock; the
                        // winner already delivered.
                        None => None,
                    }
                };
                if let Some(tx) = tx {
                    debug!(ip = %head.ip, seq = head.seq, "probe expired");
                    if let Err(e) = tx.try_send(PingExpired {
                        seq: head.seq,
                        sent_at: head.sent_at,
                    }) {
                        debug!(ip = %head.ip, seq = head.seq, error = %e, "expired event dropped");
                    }
                }
            }
        }
    }

    // Shutdown path: clear the running flag so a later start can respawn.
    shared.state.write().expirer_running = false;
    debug!("expirer stopped by shutdown");
}

fn deliver_success(tx: Option<mpsc::Sender<PingSuccess>>, head: Probe, success: PingSuccess) {
    match tx {
        Some(tx) => {
            if let Err(e) = tx.try_send(success) {
                debug!(ip = %head.ip, seq = head.seq, error = %e, "synthetic success dropped");
            }
        }
        None => debug!(ip = %head.ip, seq = head.seq, "no channels for synthetic success"),
    }
}
