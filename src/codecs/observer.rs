//! Progress reporting and cooperative cancellation.

use super::calculations::granularity_step;
use super::loader::CodecError;

/// Caller-supplied capability for progress and cancellation.
///
/// Adapters borrow the observer for the duration of one call and never keep
/// it afterwards.
pub trait LoadObserver {
    /// Receives monotonically increasing values in `0.0..=1.0`.
    fn progress(&mut self, value: f32);

    /// Polled at checkpoints; returning `false` aborts the call.
    fn continue_query(&mut self) -> bool {
        true
    }

    /// Higher values mean more frequent checkpoints. `1.0` is the default cadence.
    fn granularity(&self) -> f32 {
        1.0
    }
}

/// Wraps the optional observer of a single call.
///
/// Clamps reported values to `0.0..=1.0` and never reports a value lower than
/// one already sent.
pub(crate) struct Progress<'a> {
    observer: Option<&'a mut dyn LoadObserver>,
    last: f32,
}

/// Checkpoint schedule for one loop, built by [`Progress::slice`].
pub(crate) struct Checkpoints {
    step: usize,
    next: usize,
    total: usize,
    start: f32,
    span: f32,
}

impl<'a> Progress<'a> {
    pub fn new(observer: Option<&'a mut dyn LoadObserver>) -> Self {
        Self {
            observer,
            last: 0.0,
        }
    }

    pub fn report(&mut self, value: f32) {
        let value = value.clamp(0.0, 1.0);
        if value < self.last {
            return;
        }
        self.last = value;
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.progress(value);
        }
    }

    /// Poll the observer once.
    pub fn check(&mut self) -> Result<(), CodecError> {
        if let Some(observer) = self.observer.as_deref_mut() {
            if !observer.continue_query() {
                return Err(CodecError::Cancelled);
            }
        }
        Ok(())
    }

    /// Report `value` after a successful poll.
    pub fn checkpoint(&mut self, value: f32) -> Result<(), CodecError> {
        self.check()?;
        self.report(value);
        Ok(())
    }

    pub fn finish(&mut self) {
        self.report(1.0);
    }

    /// Schedule checkpoints for a loop of `total` units that moves progress
    /// from `start` to `end`.
    pub fn slice(&self, total: usize, start: f32, end: f32) -> Checkpoints {
        let span = (end - start).max(0.0);
        let granularity = self.observer.as_deref().map(|o| o.granularity());
        Checkpoints {
            step: granularity_step(total, span, granularity),
            next: 0,
            total: total.max(1),
            start,
            span,
        }
    }

    /// Called with each loop index; polls and reports when a checkpoint is due.
    pub fn tick(&mut self, checkpoints: &mut Checkpoints, index: usize) -> Result<(), CodecError> {
        if index < checkpoints.next {
            return Ok(());
        }
        checkpoints.next = index.saturating_add(checkpoints.step);
        let fraction = index as f32 / checkpoints.total as f32;
        self.checkpoint(checkpoints.start + checkpoints.span * fraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{CancelAfter, RecordingObserver};

    #[test]
    fn report_is_monotonic_and_clamped() {
        let mut observer = RecordingObserver::default();
        {
            let mut progress = Progress::new(Some(&mut observer));
            progress.report(0.3);
            progress.report(0.2);
            progress.report(1.7);
        }
        assert_eq!(observer.values, vec![0.3, 1.0]);
    }

    #[test]
    fn no_observer_never_cancels() {
        let mut progress = Progress::new(None);
        let mut rows = progress.slice(100, 0.1, 0.8);
        for y in 0..100 {
            progress.tick(&mut rows, y).unwrap();
        }
    }

    #[test]
    fn tick_polls_first_index_and_then_every_step() {
        let mut observer = RecordingObserver::default();
        {
            let mut progress = Progress::new(Some(&mut observer));
            // 1000 rows over a 0.5 slice: step = 1000 / 10 = 100
            let mut rows = progress.slice(1000, 0.0, 0.5);
            for y in 0..1000 {
                progress.tick(&mut rows, y).unwrap();
            }
        }
        assert_eq!(observer.polls, 10);
        assert_eq!(observer.values.first().copied(), Some(0.0));
        assert!((observer.values[1] - 0.05).abs() < 1e-6);
    }

    #[test]
    fn cancellation_surfaces_as_error() {
        let mut observer = CancelAfter::new(0);
        let mut progress = Progress::new(Some(&mut observer));
        let mut rows = progress.slice(10, 0.1, 0.9);
        let err = progress.tick(&mut rows, 0).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn check_polls_once_per_call_until_refused() {
        let mut observer = CancelAfter::new(2);
        {
            let mut progress = Progress::new(Some(&mut observer));
            progress.check().unwrap();
            progress.check().unwrap();
            assert!(progress.check().unwrap_err().is_cancelled());
        }
        assert_eq!(observer.polls, 3);
    }
}
