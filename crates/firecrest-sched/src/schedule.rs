//! Polling backoff schedules.

use std::fmt;
use std::time::Duration;

/// Ordered waits between two polls of a task.
///
/// One element is consumed per unsuccessful poll. Running out is reported
/// by [`PollingSchedule::next_wait`] returning `None`, which the poller
/// turns into [`SchedError::PollingExhausted`](crate::SchedError::PollingExhausted).
pub struct PollingSchedule {
    waits: Box<dyn Iterator<Item = Duration> + Send>,
    consumed: usize,
}

impl PollingSchedule {
    pub fn new<I>(waits: I) -> Self
    where
        I: IntoIterator<Item = Duration>,
        I::IntoIter: Send + 'static,
    {
        Self {
            waits: Box::new(waits.into_iter()),
            consumed: 0,
        }
    }

    /// `count` polls with no wait in between.
    pub fn immediate(count: usize) -> Self {
        Self::new(std::iter::repeat_n(Duration::ZERO, count))
    }

    /// Waits given in (fractional) seconds.
    pub fn from_secs_f64(waits: Vec<f64>) -> Self {
        Self::new(
            waits
                .into_iter()
                .map(|s| Duration::from_secs_f64(s.max(0.0))),
        )
    }

    /// Repeat `waits` forever.
    pub fn cycle(waits: Vec<Duration>) -> Self {
        if waits.is_empty() {
            return Self::new(std::iter::empty());
        }
        Self::new(waits.into_iter().cycle())
    }

    /// `base`, `2 * base`, `4 * base`, ... capped at `max`. Never exhausted.
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self::new(
            std::iter::successors(Some(base.min(max)), move |prev| {
                Some(prev.saturating_mul(2).min(max))
            }),
        )
    }

    /// Pull the next wait, or `None` when the schedule is exhausted.
    pub fn next_wait(&mut self) -> Option<Duration> {
        let wait = self.waits.next()?;
        self.consumed += 1;
        Some(wait)
    }

    /// Waits handed out so far.
    pub fn consumed(&self) -> usize {
        self.consumed
    }
}

impl From<Vec<Duration>> for PollingSchedule {
    fn from(waits: Vec<Duration>) -> Self {
        Self::new(waits)
    }
}

impl fmt::Debug for PollingSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingSchedule")
            .field("consumed", &self.consumed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediate_exhausts() {
        let mut schedule = PollingSchedule::immediate(2);
        assert_eq!(schedule.next_wait(), Some(Duration::ZERO));
        assert_eq!(schedule.next_wait(), Some(Duration::ZERO));
        assert_eq!(schedule.next_wait(), None);
        assert_eq!(schedule.consumed(), 2);
    }

    #[test]
    fn test_from_secs() {
        let mut schedule = PollingSchedule::from_secs_f64(vec![0.5, -1.0]);
        assert_eq!(schedule.next_wait(), Some(Duration::from_millis(500)));
        assert_eq!(schedule.next_wait(), Some(Duration::ZERO));
        assert_eq!(schedule.next_wait(), None);
    }

    #[test]
    fn test_cycle() {
        let mut schedule =
            PollingSchedule::cycle(vec![Duration::from_secs(1), Duration::from_secs(5)]);
        let waits: Vec<_> = (0..5).filter_map(|_| schedule.next_wait()).collect();
        assert_eq!(
            waits,
            [1, 5, 1, 5, 1].map(Duration::from_secs).to_vec()
        );
        assert_eq!(PollingSchedule::cycle(Vec::new()).next_wait(), None);
    }

    #[test]
    fn test_exponential_caps() {
        let mut schedule =
            PollingSchedule::exponential(Duration::from_secs(1), Duration::from_secs(5));
        let waits: Vec<_> = (0..5).filter_map(|_| schedule.next_wait()).collect();
        assert_eq!(waits, [1, 2, 4, 5, 5].map(Duration::from_secs).to_vec());
    }
}
