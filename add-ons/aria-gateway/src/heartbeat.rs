//! Heartbeat supervision: fixed-interval pings, two misses force a close.
//!
//! One supervisor per leg. Miss counting is plain state driven by the
//! pump's interval ticks and pong arrivals, so the policy is testable
//! without timers; the pump owns the `tokio::time::interval` and carries
//! out the returned action.

use tracing::warn;

/// How many consecutive unanswered pings close the leg.
pub const MISS_LIMIT: u32 = 2;

/// What the pump must do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping frame on this leg.
    Ping,
    /// The leg is dead: close it, cascading to the paired leg.
    ForceClose,
}

/// Per-leg liveness tracker.
#[derive(Debug)]
pub struct HeartbeatSupervisor {
    leg: &'static str,
    awaiting_pong: bool,
    missed: u32,
}

impl HeartbeatSupervisor {
    pub fn new(leg: &'static str) -> Self {
        Self {
            leg,
            awaiting_pong: false,
            missed: 0,
        }
    }

    /// Interval tick: counts a miss if the previous ping went unanswered,
    /// then either closes the leg or pings again.
    pub fn on_tick(&mut self) -> HeartbeatAction {
        if self.awaiting_pong {
            self.missed += 1;
            warn!(
                target: "aria::heartbeat",
                leg = self.leg,
                missed = self.missed,
                "heartbeat unanswered"
            );
            if self.missed >= MISS_LIMIT {
                return HeartbeatAction::ForceClose;
            }
        }
        self.awaiting_pong = true;
        HeartbeatAction::Ping
    }

    /// A pong arrived on this leg.
    pub fn on_pong(&mut self) {
        self.awaiting_pong = false;
        self.missed = 0;
    }

    pub fn missed(&self) -> u32 {
        self.missed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answered_pings_never_close() {
        let mut hb = HeartbeatSupervisor::new("client");
        for _ in 0..10 {
            assert_eq!(hb.on_tick(), HeartbeatAction::Ping);
            hb.on_pong();
        }
        assert_eq!(hb.missed(), 0);
    }

    #[test]
    fn two_consecutive_misses_force_close() {
        let mut hb = HeartbeatSupervisor::new("upstream");
        assert_eq!(hb.on_tick(), HeartbeatAction::Ping); // ping 1, never answered
        assert_eq!(hb.on_tick(), HeartbeatAction::Ping); // miss 1, ping 2
        assert_eq!(hb.on_tick(), HeartbeatAction::ForceClose); // miss 2
    }

    #[test]
    fn late_pong_resets_the_count() {
        let mut hb = HeartbeatSupervisor::new("client");
        hb.on_tick();
        hb.on_tick(); // one miss
        hb.on_pong();
        hb.on_tick();
        assert_eq!(hb.on_tick(), HeartbeatAction::Ping); // back to one miss
        assert_eq!(hb.missed(), 1);
    }
}
