//! RTT and congestion estimation

use crate::segment::constants;

/// Smoothed round-trip-time and retransmission-timeout estimator.
///
/// Classic TCP-style EWMAs: SRTT weight 1/8, variance weight 1/4. The RTO
/// is `SRTT + max(4 * RTTVAR, interval)` clamped to `[min_rto, RTO_MAX]`.
/// State is only refined, never reset, except through [`RttEstimator::reset`].
#[derive(Debug)]
pub struct RttEstimator {
    srtt: u32,
    rttvar: u32,
    rto: u32,
    min_rto: u32,
}

impl RttEstimator {
    /// Create an estimator with no samples yet
    pub fn new(min_rto: u32) -> Self {
        Self {
            srtt: 0,
            rttvar: 0,
            rto: constants::RTO_DEFAULT,
            min_rto,
        }
    }

    /// Fold one RTT sample (milliseconds) into the estimate. Samples are
    /// clamped to the RTO ceiling so the EWMA arithmetic stays in range.
    pub fn sample(&mut self, rtt: u32, interval: u32) {
        let rtt = rtt.min(constants::RTO_MAX);
        if self.srtt == 0 {
            self.srtt = rtt.max(1);
            self.rttvar = rtt / 2;
        } else {
            let delta = self.srtt.abs_diff(rtt);
            self.rttvar = (3 * self.rttvar + delta) / 4;
            self.srtt = ((7 * self.srtt + rtt) / 8).max(1);
        }

        let rto = self.srtt + (4 * self.rttvar).max(interval);
        self.rto = rto.clamp(self.min_rto, constants::RTO_MAX);
    }

    /// Current retransmission timeout
    pub fn rto(&self) -> u32 {
        self.rto.max(self.min_rto)
    }

    /// Current smoothed RTT (0 before the first sample)
    pub fn srtt(&self) -> u32 {
        self.srtt
    }

    /// Current RTT variance
    pub fn rttvar(&self) -> u32 {
        self.rttvar
    }

    /// Adjust the RTO floor when the delay mode changes
    pub fn set_min_rto(&mut self, min_rto: u32) {
        self.min_rto = min_rto;
    }

    /// Explicit connection-level reset
    pub fn reset(&mut self) {
        self.srtt = 0;
        self.rttvar = 0;
        self.rto = constants::RTO_DEFAULT;
    }
}

/// Congestion window: slow start below `ssthresh`, additive increase above,
/// multiplicative decrease on loss.
#[derive(Debug)]
pub struct CongestionWindow {
    cwnd: u32,
    ssthresh: u32,
    incr: u32,
    mss: u32,
}

impl CongestionWindow {
    /// Create a congestion window starting at the configured send window
    pub fn new(initial: u32, mss: u32) -> Self {
        Self {
            cwnd: initial.max(1),
            ssthresh: constants::THRESH_INIT,
            incr: initial.max(1) * mss,
            mss,
        }
    }

    /// Allowed in-flight window in segments
    pub fn window(&self) -> u32 {
        self.cwnd
    }

    /// Update the MSS after an MTU change
    pub fn set_mss(&mut self, mss: u32) {
        self.mss = mss.max(1);
    }

    /// Grow the window after cumulative-ack progress, capped by the
    /// remote's advertised window.
    pub fn on_progress(&mut self, rmt_wnd: u32) {
        if self.cwnd >= rmt_wnd {
            return;
        }

        let mss = self.mss;
        if self.cwnd < self.ssthresh {
            self.cwnd += 1;
            self.incr += mss;
        } else {
            if self.incr < mss {
                self.incr = mss;
            }
            self.incr += (mss * mss) / self.incr + (mss / 16);
            if (self.cwnd + 1) * mss <= self.incr {
                self.cwnd = if mss > 0 { self.incr.div_ceil(mss) } else { 1 };
            }
        }

        if self.cwnd > rmt_wnd {
            self.cwnd = rmt_wnd;
            self.incr = rmt_wnd * mss;
        }
    }

    /// Multiplicative decrease after an RTO-triggered retransmission
    pub fn on_loss(&mut self) {
        self.ssthresh = (self.cwnd / 2).max(constants::THRESH_MIN);
        self.cwnd = 1;
        self.incr = self.mss;
    }

    /// Back off after a fast retransmission, keeping half the in-flight
    /// window plus the duplicate-ack allowance.
    pub fn on_fast_resend(&mut self, inflight: u32, resend: u32) {
        self.ssthresh = (inflight / 2).max(constants::THRESH_MIN);
        self.cwnd = self.ssthresh + resend;
        self.incr = self.cwnd * self.mss;
    }

    /// Explicit connection-level reset
    pub fn reset(&mut self, initial: u32) {
        self.cwnd = initial.max(1);
        self.ssthresh = constants::THRESH_INIT;
        self.incr = self.cwnd * self.mss;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_seeds_srtt_and_variance() {
        let mut rtt = RttEstimator::new(constants::RTO_MIN);
        rtt.sample(80, 40);
        assert_eq!(rtt.srtt(), 80);
        assert_eq!(rtt.rttvar(), 40);
        assert_eq!(rtt.rto(), 80 + 160);
    }

    #[test]
    fn smoothing_converges_toward_stable_rtt() {
        let mut rtt = RttEstimator::new(constants::RTO_MIN);
        for _ in 0..50 {
            rtt.sample(100, 40);
        }
        assert!((95..=105).contains(&rtt.srtt()));
        // Variance decays toward zero on a stable link
        assert!(rtt.rttvar() < 10);
    }

    #[test]
    fn rto_clamps_to_floor_and_ceiling() {
        let mut rtt = RttEstimator::new(constants::RTO_MIN);
        rtt.sample(1, 10);
        assert_eq!(rtt.rto(), constants::RTO_MIN);

        let mut slow = RttEstimator::new(constants::RTO_MIN);
        slow.sample(100_000, 40);
        assert_eq!(slow.rto(), constants::RTO_MAX);
    }

    #[test]
    fn huge_sample_is_clamped_not_overflowed() {
        // A stale echoed timestamp can produce a near-2^31 sample
        let mut rtt = RttEstimator::new(constants::RTO_MIN);
        rtt.sample(i32::MAX as u32, 40);
        assert_eq!(rtt.srtt(), constants::RTO_MAX);
        assert_eq!(rtt.rto(), constants::RTO_MAX);

        rtt.sample(i32::MAX as u32, 40);
        rtt.sample(100, 40);
        assert!(rtt.rto() <= constants::RTO_MAX);
    }

    #[test]
    fn nodelay_floor_is_lower() {
        let mut rtt = RttEstimator::new(constants::RTO_NODELAY_MIN);
        rtt.sample(1, 10);
        assert_eq!(rtt.rto(), constants::RTO_NODELAY_MIN);
    }

    #[test]
    fn loss_collapses_congestion_window() {
        let mut cwnd = CongestionWindow::new(32, 1380);
        cwnd.on_loss();
        assert_eq!(cwnd.window(), 1);

        // Slow start climbs back one segment per progression
        cwnd.on_progress(128);
        assert_eq!(cwnd.window(), 2);
    }

    #[test]
    fn growth_is_capped_by_remote_window() {
        let mut cwnd = CongestionWindow::new(1, 1380);
        for _ in 0..100 {
            cwnd.on_progress(8);
        }
        assert_eq!(cwnd.window(), 8);
    }

    #[test]
    fn fast_resend_keeps_half_inflight() {
        let mut cwnd = CongestionWindow::new(32, 1380);
        cwnd.on_fast_resend(16, 2);
        assert_eq!(cwnd.window(), 8 + 2);
    }
}
