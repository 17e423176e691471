/// Adaptive delay between polls of a single shard, counted in poll units.
///
/// A poll that returned records while the reader is caught up with the tip
/// of the shard resets the delay to zero. Any other poll moves the delay
/// from 0 to 1, or doubles it, never beyond the ceiling. The first step is
/// always one unit, even with a ceiling of zero, so an idle shard is never
/// polled back to back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollBackoff {
    delay: u32,
}

impl PollBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay chosen by the most recent call to [`PollBackoff::observe`]
    pub fn current(&self) -> u32 {
        self.delay
    }

    /// Fold in the outcome of a poll and return the delay before the next one.
    ///
    /// A backend that does not report lag is treated as caught up.
    pub fn observe(
        &mut self,
        record_count: usize,
        millis_behind_latest: Option<i64>,
        max_wait: u32,
    ) -> u32 {
        let caught_up = millis_behind_latest.map_or(true, |lag| lag <= 0);

        self.delay = if record_count > 0 && caught_up {
            0
        } else if self.delay == 0 {
            1
        } else {
            self.delay.saturating_mul(2).min(max_wait.max(1))
        };

        self.delay
    }
}
