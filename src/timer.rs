use tokio::time::Instant;

/// A pending piece of deferred engine work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerToken {
    /// Clear the loop-suppression label of an interface, provided it is
    /// still in the group it was marked under.
    LoopSuppressionClear { if_name: String, pg_name: String },
    /// Periodic expiry sweep of the neighbor cache.
    NeighborSweep,
}

/// Pending timers, ordered by deadline.
///
/// The engine mutates this table and pokes its wakeup handle; a single
/// loop task sleeps until [`TimerCtrl::next`] and then drains
/// [`TimerCtrl::due`]. Cancellation is a plain removal, so a cancelled
/// token can never fire late.
#[derive(Debug, Default)]
pub struct TimerCtrl {
    timers: Vec<(TimerToken, Instant)>,
}

impl TimerCtrl {
    pub fn new() -> TimerCtrl {
        TimerCtrl::default()
    }

    pub fn schedule(&mut self, token: TimerToken, at: Instant) {
        self.timers.push((token, at));
        self.timers.sort_by(|l, r| l.1.cmp(&r.1));
    }

    pub fn active(&self, token: &TimerToken) -> bool {
        self.timers.iter().any(|(t, _)| t == token)
    }

    pub fn cancel(&mut self, token: &TimerToken) {
        self.timers.retain(|(t, _)| t != token);
    }

    /// Drops any pending loop-suppression clear for `if_name`,
    /// regardless of the group it was scheduled under.
    pub fn cancel_loop_clear(&mut self, if_name: &str) {
        self.timers.retain(|(t, _)| {
            !matches!(t, TimerToken::LoopSuppressionClear { if_name: n, .. } if n == if_name)
        });
    }

    /// The earliest pending deadline.
    pub fn next(&self) -> Option<Instant> {
        self.timers.first().map(|(_, at)| *at)
    }

    /// Removes and returns every token due at `now`, in deadline order.
    pub fn due(&mut self, now: Instant) -> Vec<TimerToken> {
        let mut tokens = Vec::new();
        while let Some((_, at)) = self.timers.first() {
            if *at > now {
                break;
            }
            tokens.push(self.timers.remove(0).0);
        }
        tokens
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn loop_clear(if_name: &str) -> TimerToken {
        TimerToken::LoopSuppressionClear {
            if_name: if_name.to_string(),
            pg_name: "g1".to_string(),
        }
    }

    #[test]
    fn due_returns_tokens_in_deadline_order() {
        let mut timers = TimerCtrl::new();
        let now = Instant::now();
        timers.schedule(loop_clear("vmtap1"), now + Duration::from_secs(20));
        timers.schedule(loop_clear("vmtap0"), now + Duration::from_secs(10));
        timers.schedule(TimerToken::NeighborSweep, now + Duration::from_secs(30));

        assert_eq!(timers.next(), Some(now + Duration::from_secs(10)));
        assert!(timers.due(now + Duration::from_secs(5)).is_empty());
        assert_eq!(
            timers.due(now + Duration::from_secs(25)),
            [loop_clear("vmtap0"), loop_clear("vmtap1")]
        );
        assert_eq!(timers.next(), Some(now + Duration::from_secs(30)));
        assert_eq!(
            timers.due(now + Duration::from_secs(30)),
            [TimerToken::NeighborSweep]
        );
        assert!(timers.is_empty());
    }

    #[test]
    fn cancel_removes_pending_tokens() {
        let mut timers = TimerCtrl::new();
        let now = Instant::now();
        timers.schedule(loop_clear("vmtap0"), now + Duration::from_secs(10));
        timers.schedule(TimerToken::NeighborSweep, now + Duration::from_secs(10));

        assert!(timers.active(&loop_clear("vmtap0")));
        timers.cancel(&loop_clear("vmtap0"));
        assert!(!timers.active(&loop_clear("vmtap0")));
        assert_eq!(
            timers.due(now + Duration::from_secs(10)),
            [TimerToken::NeighborSweep]
        );
    }

    #[test]
    fn cancel_loop_clear_ignores_group() {
        let mut timers = TimerCtrl::new();
        let now = Instant::now();
        timers.schedule(
            TimerToken::LoopSuppressionClear {
                if_name: "vmtap0".to_string(),
                pg_name: "other".to_string(),
            },
            now + Duration::from_secs(10),
        );
        timers.cancel_loop_clear("vmtap0");
        assert!(timers.is_empty());
    }
}
