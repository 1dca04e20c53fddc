pub(crate) const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Mode-specific throttling policy for the smooth reservation algorithm.
///
/// Both modes share the reservation flow in [`SmoothState`]; the policy
/// answers the two questions the flow cannot answer itself: how long it takes
/// an idle bucket to earn one permit, and what spending already-stored
/// permits costs.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Policy {
    /// Token bucket with stored-burst credit. Stored permits are free to
    /// spend; idle time accrues permits at exactly the stable rate.
    Bursty { max_burst_seconds: f64 },
    /// Cold-start ramp. Near-full buckets serve slowly (up to
    /// `cold_factor` times the stable interval per permit) and speed up
    /// linearly as stored permits drain below the threshold.
    WarmingUp {
        warmup_period_micros: u64,
        cold_factor: f64,
        threshold_permits: f64,
        slope: f64,
    },
}

/// Shared state of a smooth rate limiter, guarded by the owning limiter's
/// lock.
///
/// The future is modelled as a monotonically advancing `next_free_ticket`
/// clock: each reservation returns the pre-advance moment and charges its own
/// cost forward, so a caller with available permits returns immediately while
/// the next caller pays for it.
#[derive(Debug)]
pub(crate) struct SmoothState {
    pub(crate) stable_interval_micros: f64,
    pub(crate) max_permits: f64,
    pub(crate) stored_permits: f64,
    pub(crate) next_free_ticket_micros: u64,
    pub(crate) policy: Policy,
}

impl SmoothState {
    pub(crate) fn new(policy: Policy) -> Self {
        Self {
            stable_interval_micros: 0.0,
            max_permits: 0.0,
            stored_permits: 0.0,
            next_free_ticket_micros: 0,
            policy,
        }
    }

    /// Installs a new rate. Stored permits are first re-synced to `now` using
    /// the old cool-down interval so the change neither forgets accumulated
    /// debt nor grants an instantaneous burst.
    pub(crate) fn set_rate(&mut self, permits_per_second: f64, now_micros: u64) {
        self.resync(now_micros);
        self.stable_interval_micros = MICROS_PER_SECOND / permits_per_second;
        self.reparameterize(permits_per_second);
    }

    pub(crate) fn rate(&self) -> f64 {
        MICROS_PER_SECOND / self.stable_interval_micros
    }

    /// The earliest moment at which the next acquirer may be served.
    pub(crate) fn query_earliest_available(&self) -> u64 {
        self.next_free_ticket_micros
    }

    /// Reserves `permits` and returns the moment at which they become valid.
    ///
    /// The returned moment is the pre-advance `next_free_ticket`; the cost of
    /// this reservation advances the ticket for the caller that follows.
    pub(crate) fn reserve_earliest_available(&mut self, permits: u32, now_micros: u64) -> u64 {
        self.resync(now_micros);
        let moment_available = self.next_free_ticket_micros;
        let requested = f64::from(permits);
        let stored_to_spend = requested.min(self.stored_permits);
        let fresh = requested - stored_to_spend;
        let wait_micros = self
            .stored_permits_to_wait_time(self.stored_permits, stored_to_spend)
            + (fresh * self.stable_interval_micros) as u64;
        self.next_free_ticket_micros = self.next_free_ticket_micros.saturating_add(wait_micros);
        self.stored_permits -= stored_to_spend;
        moment_available
    }

    /// Banks permits earned since the last reservation. Only moves time
    /// forward: a `now` at or before `next_free_ticket` changes nothing.
    fn resync(&mut self, now_micros: u64) {
        if now_micros > self.next_free_ticket_micros {
            let idle = (now_micros - self.next_free_ticket_micros) as f64;
            let new_permits = idle / self.cool_down_interval_micros();
            self.stored_permits = (self.stored_permits + new_permits).min(self.max_permits);
            self.next_free_ticket_micros = now_micros;
        }
    }

    /// Microseconds of idle time required to earn one permit.
    fn cool_down_interval_micros(&self) -> f64 {
        match self.policy {
            Policy::Bursty { .. } => self.stable_interval_micros,
            Policy::WarmingUp {
                warmup_period_micros,
                ..
            } => warmup_period_micros as f64 / self.max_permits,
        }
    }

    /// Cost in microseconds of taking `take` permits out of `stored`.
    ///
    /// Bursty: stored permits are free. Warming up: the trapezoidal area
    /// under the throttling line for the portion above the threshold, plus
    /// the stable interval for the rest. Each half-area is truncated toward
    /// zero separately so results are bit-identical across rebuilds.
    fn stored_permits_to_wait_time(&self, stored: f64, take: f64) -> u64 {
        match self.policy {
            Policy::Bursty { .. } => 0,
            Policy::WarmingUp {
                threshold_permits,
                slope,
                ..
            } => {
                let mut remaining = take;
                let mut micros = 0u64;
                let available_above = stored - threshold_permits;
                if available_above > 0.0 {
                    let take_above = available_above.min(remaining);
                    let length = self.permits_to_time(available_above, slope)
                        + self.permits_to_time(available_above - take_above, slope);
                    micros = (take_above * length / 2.0) as u64;
                    remaining -= take_above;
                }
                micros + (self.stable_interval_micros * remaining) as u64
            }
        }
    }

    /// Instantaneous service time at `permits` stored above the threshold.
    fn permits_to_time(&self, permits: f64, slope: f64) -> f64 {
        self.stable_interval_micros + permits * slope
    }

    fn reparameterize(&mut self, permits_per_second: f64) {
        let old_max = self.max_permits;
        match self.policy {
            Policy::Bursty { max_burst_seconds } => {
                self.max_permits = max_burst_seconds * permits_per_second;
                self.stored_permits = if old_max == f64::INFINITY {
                    self.max_permits
                } else if old_max == 0.0 {
                    // initial state: bursts are not pre-charged
                    0.0
                } else {
                    self.stored_permits * self.max_permits / old_max
                };
            }
            Policy::WarmingUp {
                warmup_period_micros,
                cold_factor,
                ..
            } => {
                let stable = self.stable_interval_micros;
                let warmup = warmup_period_micros as f64;
                let cold_interval = stable * cold_factor;
                let threshold_permits = 0.5 * warmup / stable;
                let max_permits = threshold_permits + 2.0 * warmup / (stable + cold_interval);
                let slope = (cold_interval - stable) / (max_permits - threshold_permits);
                self.max_permits = max_permits;
                self.stored_permits = if old_max == f64::INFINITY {
                    0.0
                } else if old_max == 0.0 {
                    // initial state is cold: the bucket starts full
                    max_permits
                } else {
                    self.stored_permits * max_permits / old_max
                };
                self.policy = Policy::WarmingUp {
                    warmup_period_micros,
                    cold_factor,
                    threshold_permits,
                    slope,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bursty(rate: f64, max_burst_seconds: f64) -> SmoothState {
        let mut state = SmoothState::new(Policy::Bursty { max_burst_seconds });
        state.set_rate(rate, 0);
        state
    }

    fn warming_up(rate: f64, warmup_period_micros: u64, cold_factor: f64) -> SmoothState {
        let mut state = SmoothState::new(Policy::WarmingUp {
            warmup_period_micros,
            cold_factor,
            threshold_permits: 0.0,
            slope: 0.0,
        });
        state.set_rate(rate, 0);
        state
    }

    #[test]
    fn bursty_starts_empty() {
        let state = bursty(5.0, 1.0);
        assert_eq!(5.0, state.max_permits);
        assert_eq!(0.0, state.stored_permits);
        assert_eq!(200_000.0, state.stable_interval_micros);
    }

    #[test]
    fn bursty_charges_cost_forward() {
        let mut state = bursty(5.0, 1.0);
        // acquire 1 at t=0: served now, next ticket moves to 200ms
        assert_eq!(0, state.reserve_earliest_available(1, 0));
        assert_eq!(200_000, state.next_free_ticket_micros);
        // acquire 1 at t=50ms: served at 200ms, i.e. a 150ms wait
        assert_eq!(200_000, state.reserve_earliest_available(1, 50_000));
        assert_eq!(400_000, state.next_free_ticket_micros);
    }

    #[test]
    fn bursty_idle_banks_up_to_capacity() {
        let mut state = bursty(5.0, 1.0);
        // ten seconds of idle only banks max_permits
        state.reserve_earliest_available(1, 10_000_000);
        // one permit was just spent from the full bucket
        assert_eq!(4.0, state.stored_permits);
        assert_eq!(10_000_000, state.next_free_ticket_micros);
    }

    #[test]
    fn bursty_burst_is_free_then_stable() {
        let mut state = bursty(5.0, 1.0);
        // idle two seconds (>= capacity / rate) fills the bucket
        assert_eq!(2_000_000, state.reserve_earliest_available(5, 2_000_000));
        // the whole burst was paid from storage, no forward charge
        assert_eq!(2_000_000, state.next_free_ticket_micros);
        // the next permit is fresh and costs one stable interval
        assert_eq!(2_000_000, state.reserve_earliest_available(1, 2_000_000));
        assert_eq!(2_200_000, state.next_free_ticket_micros);
    }

    #[test]
    fn bursty_set_rate_rescales_stored_proportionally() {
        let mut state = bursty(5.0, 1.0);
        state.reserve_earliest_available(1, 2_000_000);
        assert_eq!(4.0, state.stored_permits);
        // halving the rate halves the capacity and the balance
        state.set_rate(2.5, 2_000_000);
        assert_eq!(2.5, state.max_permits);
        assert_eq!(2.0, state.stored_permits);
    }

    #[test]
    fn set_rate_resyncs_with_old_interval_first() {
        let mut state = bursty(1.0, 5.0);
        // two seconds idle at 1 qps banks 2 permits under the old interval,
        // even though the new rate is installed at the same moment
        state.set_rate(10.0, 2_000_000);
        // 2 banked out of old max 5, rescaled to the new max 50
        assert_eq!(50.0, state.max_permits);
        assert_eq!(20.0, state.stored_permits);
    }

    #[test]
    fn warming_up_parameters() {
        // 10 qps, 2s warmup, cold factor 3: stable 100ms, cold 300ms
        let state = warming_up(10.0, 2_000_000, 3.0);
        match state.policy {
            Policy::WarmingUp {
                threshold_permits,
                slope,
                ..
            } => {
                assert_eq!(10.0, threshold_permits);
                assert_eq!(20_000.0, slope);
            }
            Policy::Bursty { .. } => panic!("expected warming-up policy"),
        }
        assert_eq!(20.0, state.max_permits);
        // initial state is cold: full bucket
        assert_eq!(20.0, state.stored_permits);
    }

    #[test]
    fn warming_up_trapezoid_equals_warmup_period() {
        // draining from full down to the threshold costs exactly the warmup
        // period: the area of the trapezoid under the throttling line
        let mut state = warming_up(10.0, 2_000_000, 3.0);
        assert_eq!(0, state.reserve_earliest_available(10, 0));
        assert_eq!(2_000_000, state.next_free_ticket_micros);
        assert_eq!(10.0, state.stored_permits);
    }

    #[test]
    fn warming_up_below_threshold_costs_stable_interval() {
        let mut state = warming_up(10.0, 2_000_000, 3.0);
        state.reserve_earliest_available(10, 0);
        // the next 10 permits sit below the threshold: stable cost each
        state.reserve_earliest_available(10, 0);
        assert_eq!(3_000_000, state.next_free_ticket_micros);
        assert_eq!(0.0, state.stored_permits);
    }

    #[test]
    fn warming_up_partial_drain_from_full() {
        // taking 5 out of 20 stored consumes the steepest end of the ramp:
        // 5 * (permits_to_time(10) + permits_to_time(5)) / 2
        //   = 5 * (300_000 + 200_000) / 2 = 1_250_000
        let mut state = warming_up(10.0, 2_000_000, 3.0);
        state.reserve_earliest_available(5, 0);
        assert_eq!(1_250_000, state.next_free_ticket_micros);
        assert_eq!(15.0, state.stored_permits);
    }

    #[test]
    fn warming_up_refills_in_warmup_period() {
        let mut state = warming_up(10.0, 2_000_000, 3.0);
        // drain everything
        state.reserve_earliest_available(20, 0);
        assert_eq!(0.0, state.stored_permits);
        let drained_at = state.next_free_ticket_micros;
        // idle exactly one warmup period: back to full (cold)
        let mut probe = state;
        probe.reserve_earliest_available(1, drained_at + 2_000_000);
        assert_eq!(probe.max_permits - 1.0, probe.stored_permits);
    }

    #[test]
    fn warming_up_spans_threshold_in_one_reservation() {
        let mut state = warming_up(10.0, 2_000_000, 3.0);
        // take 12: 10 above the threshold (the full trapezoid) plus 2 below
        state.reserve_earliest_available(12, 0);
        assert_eq!(2_200_000, state.next_free_ticket_micros);
        assert_eq!(8.0, state.stored_permits);
    }

    #[test]
    fn warming_up_set_rate_rescales_fraction_of_bucket() {
        let mut state = warming_up(10.0, 2_000_000, 3.0);
        // drain to half: 10 stored of max 20
        state.reserve_earliest_available(10, 0);
        state.set_rate(20.0, 0);
        // stable 50ms, cold 150ms, threshold 20, max 40; the half-full
        // fraction carries over even though the warmup position shifts
        assert_eq!(40.0, state.max_permits);
        assert_eq!(20.0, state.stored_permits);
    }

    #[test]
    fn next_free_ticket_never_decreases() {
        let mut state = bursty(100.0, 1.0);
        let mut last = 0;
        let schedule = [0u64, 5_000, 5_000, 3_000, 50_000, 50_000, 1_000_000];
        for now in schedule {
            state.reserve_earliest_available(3, now);
            assert!(state.next_free_ticket_micros >= last);
            assert!(state.stored_permits >= 0.0);
            assert!(state.stored_permits <= state.max_permits);
            last = state.next_free_ticket_micros;
        }
    }

    #[test]
    fn overflow_saturates() {
        let mut state = bursty(1.0, 1.0);
        state.next_free_ticket_micros = u64::MAX - 100;
        state.reserve_earliest_available(5, 0);
        assert_eq!(u64::MAX, state.next_free_ticket_micros);
        // and it stays pinned rather than wrapping
        state.reserve_earliest_available(5, 0);
        assert_eq!(u64::MAX, state.next_free_ticket_micros);
    }
}
