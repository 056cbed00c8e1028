//! RFC 6206 Trickle timer.
//!
//! Grounded on `original_source/RPL/trickle.py` for the algorithm, but
//! restructured per SPEC_FULL §9 ("Timers as events"): there is no
//! `threading.Timer`/`RLock` pair here. `Trickle` is plain engine-owned
//! state advanced only by events the engine itself schedules and pulls off
//! its own inbound channel, so no internal lock is needed.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Trickle {
    imin: Duration,
    imax: Duration,
    k: u8,
    i: Duration,
    c: u8,
}

impl Trickle {
    /// `imin` is `Imin` (already converted from `2^DIOIntMin` ms by the
    /// caller); `doublings` is `DIOIntDoublings`; `k` is the redundancy
    /// constant.
    pub fn new(imin: Duration, doublings: u8, k: u8) -> Self {
        let imax = imin * 2u32.saturating_pow(doublings as u32);
        Self { imin, imax, k, i: imin, c: 0 }
    }

    pub fn imin(&self) -> Duration {
        self.imin
    }

    pub fn imax(&self) -> Duration {
        self.imax
    }

    pub fn current_interval(&self) -> Duration {
        self.i
    }

    /// Step 1/2: pick the initial interval (uniform in `[Imin, Imax]`) and
    /// the firing offset `t` within it (uniform in `[I/2, I]`). Call once at
    /// startup; returns `t`, the delay before the engine should deliver a
    /// "trickle fired" event.
    pub fn start(&mut self, rng: &mut impl Rng) -> Duration {
        self.i = uniform(rng, self.imin, self.imax);
        self.c = 0;
        uniform(rng, self.i / 2, self.i)
    }

    /// Step 2: begin a new interval at the current `I` (does not change
    /// `I` itself — that happens at `on_interval_end`). Returns `t`.
    pub fn begin_interval(&mut self, rng: &mut impl Rng) -> Duration {
        self.c = 0;
        uniform(rng, self.i / 2, self.i)
    }

    /// Step 3: called when the `t` timer fires. `true` means the engine
    /// should transmit (e.g. send a DIO).
    pub fn should_transmit(&self) -> bool {
        self.k == 0 || self.c < self.k
    }

    /// Step 4: called when the interval itself ends; doubles `I` (capped at
    /// `Imax`) and returns the new interval length so the engine can call
    /// `begin_interval` again.
    pub fn on_interval_end(&mut self) -> Duration {
        self.i = std::cmp::min(self.i * 2, self.imax);
        self.i
    }

    /// Step 5.
    pub fn hear_consistent(&mut self) {
        self.c = self.c.saturating_add(1);
    }

    /// Step 6. Returns `true` if a reset actually happened (the engine
    /// should then call `begin_interval` immediately); `false` if already
    /// at `Imin` (no-op).
    pub fn hear_inconsistent(&mut self) -> bool {
        if self.i != self.imin {
            self.i = self.imin;
            self.c = 0;
            true
        } else {
            false
        }
    }
}

fn uniform(rng: &mut impl Rng, low: Duration, high: Duration) -> Duration {
    if high <= low {
        return low;
    }
    let span = high - low;
    let frac: f64 = rng.random();
    low + Duration::from_nanos((span.as_nanos() as f64 * frac) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn interval_stays_within_imin_imax_bounds() {
        let mut t = Trickle::new(Duration::from_millis(8), 4, 10);
        let mut rng = rng();
        t.start(&mut rng);
        for _ in 0..10 {
            assert!(t.current_interval() >= t.imin());
            assert!(t.current_interval() <= t.imax());
            t.on_interval_end();
        }
    }

    #[test]
    fn hear_inconsistent_resets_to_imin_only_when_above_it() {
        let mut t = Trickle::new(Duration::from_millis(8), 4, 10);
        let mut rng = rng();
        t.start(&mut rng);
        t.on_interval_end(); // I doubles, now > Imin
        assert!(t.current_interval() > t.imin());
        assert!(t.hear_inconsistent());
        assert_eq!(t.current_interval(), t.imin());
        // already at Imin: no-op
        assert!(!t.hear_inconsistent());
    }

    #[test]
    fn redundancy_suppresses_transmission_once_consistency_count_reached() {
        let mut t = Trickle::new(Duration::from_millis(8), 4, 2);
        assert!(t.should_transmit());
        t.hear_consistent();
        assert!(t.should_transmit());
        t.hear_consistent();
        assert!(!t.should_transmit());
    }

    #[test]
    fn zero_redundancy_always_transmits() {
        let mut t = Trickle::new(Duration::from_millis(8), 4, 0);
        t.hear_consistent();
        t.hear_consistent();
        assert!(t.should_transmit());
    }
}
