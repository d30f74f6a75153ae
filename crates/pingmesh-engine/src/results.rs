//! Per-destination ping results and running statistics

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

use crate::probe::PingSuccess;

/// Aggregate outcome of one `ping` invocation against a single destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResults {
    pub ip: IpAddr,
    pub successes: u32,
    pub failures: u32,
    /// Successes whose echoed sequence number differed from the iteration
    /// index they were consumed on.
    pub out_of_order: u32,
    /// Terminal events observed; equals `successes + failures`, and equals
    /// the requested probe count unless the run was cancelled.
    pub count: u32,
    /// RTT per iteration, zero where no success landed. Sorted ascending
    /// when the run was invoked with `sort_rtts`.
    pub rtts: Vec<Duration>,
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
    /// Population variance of the successful RTTs, in microseconds squared.
    /// Kept in a single float unit to stay numerically honest.
    pub variance_us: f64,
    pub sum: Duration,
    /// Wall-clock duration of the whole run.
    pub duration: Duration,
}

/// One-pass accumulator for a prober run.
///
/// Mean and variance use Welford's update (Knuth, TAOCP vol. 2, 3rd ed.,
/// p. 232) over RTTs expressed in microseconds as `f64`.
pub(crate) struct RunningStats {
    successes: u32,
    failures: u32,
    out_of_order: u32,
    rtts: Vec<Duration>,
    min: Duration,
    max: Duration,
    sum: Duration,
    mean_us: f64,
    m2_us: f64,
}

impl RunningStats {
    pub fn new(count: u16) -> Self {
        Self {
            successes: 0,
            failures: 0,
            out_of_order: 0,
            rtts: vec![Duration::ZERO; count as usize],
            min: Duration::ZERO,
            max: Duration::ZERO,
            sum: Duration::ZERO,
            mean_us: 0.0,
            m2_us: 0.0,
        }
    }

    /// Fold in a success received on iteration `i`.
    pub fn record_success(&mut self, i: u16, success: &PingSuccess) {
        debug_assert_eq!(
            success.rtt,
            success.received_at.duration_since(success.sent_at)
        );
        let rtt = success.rtt;
        if let Some(slot) = self.rtts.get_mut(i as usize) {
            *slot = rtt;
        }
        self.sum += rtt;

        if self.successes == 0 {
            self.min = rtt;
            self.max = rtt;
        } else {
            self.min = self.min.min(rtt);
            self.max = self.max.max(rtt);
        }
        self.successes += 1;

        let rtt_us = rtt.as_secs_f64() * 1e6;
        let delta = rtt_us - self.mean_us;
        self.mean_us += delta / f64::from(self.successes);
        self.m2_us += delta * (rtt_us - self.mean_us);

        if success.seq != i {
            self.out_of_order += 1;
        }
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    pub fn finish(mut self, ip: IpAddr, duration: Duration, sort_rtts: bool) -> PingResults {
        if sort_rtts {
            self.rtts.sort_unstable();
        }
        let mean = if self.successes > 0 {
            Duration::from_secs_f64(self.mean_us / 1e6)
        } else {
            Duration::ZERO
        };
        let variance_us = if self.successes > 0 {
            self.m2_us / f64::from(self.successes)
        } else {
            0.0
        };
        PingResults {
            ip,
            successes: self.successes,
            failures: self.failures,
            out_of_order: self.out_of_order,
            count: self.successes + self.failures,
            rtts: self.rtts,
            min: self.min,
            max: self.max,
            mean,
            variance_us,
            sum: self.sum,
            duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn success(seq: u16, rtt_ms: u64) -> PingSuccess {
        let sent_at = Instant::now();
        let rtt = Duration::from_millis(rtt_ms);
        PingSuccess {
            seq,
            sent_at,
            received_at: sent_at + rtt,
            rtt,
        }
    }

    fn localhost() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[test]
    fn welford_mean_and_variance() {
        let mut stats = RunningStats::new(3);
        stats.record_success(0, &success(0, 1));
        stats.record_success(1, &success(1, 2));
        stats.record_success(2, &success(2, 3));

        let results = stats.finish(localhost(), Duration::from_millis(30), false);
        assert_eq!(results.successes, 3);
        assert_eq!(results.min, Duration::from_millis(1));
        assert_eq!(results.max, Duration::from_millis(3));
        assert_eq!(results.sum, Duration::from_millis(6));
        assert_eq!(results.mean, Duration::from_millis(2));
        // Values 1000/2000/3000 us around mean 2000: m2 = 2e6, n = 3
        let expected = 2_000_000.0 / 3.0;
        assert!((results.variance_us - expected).abs() < 1e-6);
    }

    #[test]
    fn count_is_successes_plus_failures() {
        let mut stats = RunningStats::new(5);
        stats.record_success(0, &success(0, 1));
        stats.record_failure();
        stats.record_failure();

        let results = stats.finish(localhost(), Duration::ZERO, false);
        assert_eq!(results.count, 3);
        assert_eq!(results.count, results.successes + results.failures);
    }

    #[test]
    fn out_of_order_counts_sequence_mismatches() {
        let mut stats = RunningStats::new(2);
        stats.record_success(0, &success(1, 1));
        stats.record_success(1, &success(0, 1));

        let results = stats.finish(localhost(), Duration::ZERO, false);
        assert_eq!(results.out_of_order, 2);
    }

    #[test]
    fn rtts_recorded_by_iteration_and_sortable() {
        let mut stats = RunningStats::new(3);
        stats.record_success(0, &success(0, 9));
        stats.record_success(2, &success(2, 1));

        let results = stats.finish(localhost(), Duration::ZERO, true);
        assert_eq!(results.rtts.len(), 3);
        assert_eq!(results.rtts[0], Duration::ZERO);
        assert_eq!(results.rtts[2], Duration::from_millis(9));
    }

    #[test]
    fn empty_run_yields_zeroed_stats() {
        let stats = RunningStats::new(0);
        let results = stats.finish(localhost(), Duration::ZERO, true);
        assert_eq!(results.count, 0);
        assert_eq!(results.mean, Duration::ZERO);
        assert_eq!(results.variance_us, 0.0);
        assert!(results.rtts.is_empty());
    }
}
