//! Epoch-aligned, non-overlapping windows

use common::TimestampMs;
use config::LateEventPolicy;
use tracing::debug;

use super::{
    align_down, positive_ms, Accumulator, WindowError, WindowFlush, WindowKind, WindowResult,
};

/// Upper bound on empty windows emitted in one `advance` call. Longer
/// silences skip straight to the current window.
const MAX_EMPTY_FLUSHES: usize = 10_000;

/// Tumbling window over `[k * size, (k + 1) * size)`
#[derive(Debug)]
pub struct TumblingWindow<A: Accumulator> {
    size: i64,
    emit_empty: bool,
    late_policy: LateEventPolicy,
    current: Option<(TimestampMs, A)>,
    /// Everything before this instant has been flushed
    closed_until: Option<TimestampMs>,
}

impl<A: Accumulator> TumblingWindow<A> {
    pub fn new(size_ms: u64, emit_empty: bool, late_policy: LateEventPolicy) -> WindowResult<Self> {
        Ok(Self {
            size: positive_ms(size_ms, WindowKind::Tumbling, "size")?,
            emit_empty,
            late_policy,
            current: None,
            closed_until: None,
        })
    }

    pub fn size_ms(&self) -> i64 {
        self.size
    }

    /// Start of the open window, if any
    pub fn current_start(&self) -> Option<TimestampMs> {
        self.current.as_ref().map(|(start, _)| *start)
    }

    /// State of the open window
    pub fn current(&self) -> Option<&A> {
        self.current.as_ref().map(|(_, acc)| acc)
    }

    /// Earliest timestamp accepted without falling back on the late policy
    pub fn floor(&self) -> Option<TimestampMs> {
        self.current_start().or(self.closed_until)
    }

    /// Start of the window `timestamp` would be folded into
    ///
    /// Fails exactly when `add` would; never mutates.
    pub fn check(&self, timestamp: TimestampMs) -> WindowResult<TimestampMs> {
        let bucket = align_down(timestamp, self.size);
        match self.floor() {
            Some(open_start) if bucket < open_start => self.late_target(timestamp, open_start),
            _ => Ok(bucket),
        }
    }

    /// Fold an item in, closing earlier windows first
    ///
    /// Items for an already flushed window follow the late policy.
    pub fn add(&mut self, timestamp: TimestampMs, item: A::Item) -> WindowResult<Vec<WindowFlush<A>>> {
        let target = self.check(timestamp)?;
        if target != align_down(timestamp, self.size) {
            debug!(timestamp, window_start = target, "Merging late item into open window");
        }

        let flushes = if target > self.current_start().unwrap_or(TimestampMs::MIN) {
            self.advance(target)
        } else {
            Vec::new()
        };

        let (_, acc) = self
            .current
            .get_or_insert_with(|| (target, A::open(target)));
        acc.accumulate(timestamp, item);

        Ok(flushes)
    }

    fn late_target(&self, timestamp: TimestampMs, open_start: TimestampMs) -> WindowResult<TimestampMs> {
        match self.late_policy {
            LateEventPolicy::Drop => Err(WindowError::LateEvent {
                timestamp,
                closed_until: open_start,
            }),
            LateEventPolicy::MergeIntoCurrent => Ok(open_start),
        }
    }

    /// Fire every boundary at or before `now`
    pub fn advance(&mut self, now: TimestampMs) -> Vec<WindowFlush<A>> {
        let mut flushes = Vec::new();
        let mut empties = 0usize;

        while let Some((start, _)) = &self.current {
            let end = start + self.size;
            if end > now {
                break;
            }
            if let Some((start, acc)) = self.current.take() {
                self.closed_until = Some(end);
                let empty = acc.is_empty();
                if empty {
                    empties += 1;
                }
                if !empty || self.emit_empty {
                    flushes.push(WindowFlush {
                        kind: WindowKind::Tumbling,
                        start,
                        end,
                        state: acc,
                    });
                }
            }

            if self.emit_empty {
                let next = if empties >= MAX_EMPTY_FLUSHES {
                    debug!(from = end, to = now, "Skipping long run of empty windows");
                    align_down(now, self.size)
                } else {
                    end
                };
                self.current = Some((next, A::open(next)));
            }
        }

        flushes
    }

    /// Close the open window regardless of time (end of stream)
    pub fn flush(&mut self) -> Option<WindowFlush<A>> {
        let (start, acc) = self.current.take()?;
        let end = start + self.size;
        self.closed_until = Some(end);
        if acc.is_empty() && !self.emit_empty {
            return None;
        }
        Some(WindowFlush {
            kind: WindowKind::Tumbling,
            start,
            end,
            state: acc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn window(emit_empty: bool, policy: LateEventPolicy) -> TumblingWindow<Vec<u32>> {
        TumblingWindow::new(1_000, emit_empty, policy).unwrap()
    }

    #[test]
    fn test_zero_size_rejected() {
        let result = TumblingWindow::<Vec<u32>>::new(0, false, LateEventPolicy::Drop);
        assert_matches!(result, Err(WindowError::InvalidSize { .. }));
    }

    #[test]
    fn test_boundaries_are_epoch_aligned() {
        let mut w = window(false, LateEventPolicy::Drop);
        assert!(w.add(1_250, 1).unwrap().is_empty());
        assert_eq!(w.current_start(), Some(1_000));

        let flushes = w.add(2_100, 2).unwrap();
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0].start, 1_000);
        assert_eq!(flushes[0].end, 2_000);
        assert_eq!(flushes[0].state, vec![1]);
        assert_eq!(w.current_start(), Some(2_000));
    }

    #[test]
    fn test_timer_flush_on_advance() {
        let mut w = window(false, LateEventPolicy::Drop);
        w.add(100, 1).unwrap();
        w.add(900, 2).unwrap();
        assert!(w.advance(999).is_empty());

        let flushes = w.advance(1_000);
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0].state, vec![1, 2]);
        assert!(w.current_start().is_none());
    }

    #[test]
    fn test_empty_windows_suppressed_by_default() {
        let mut w = window(false, LateEventPolicy::Drop);
        w.add(100, 1).unwrap();
        let flushes = w.add(3_500, 2).unwrap();
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0].start, 0);
    }

    #[test]
    fn test_empty_windows_emitted_when_enabled() {
        let mut w = window(true, LateEventPolicy::Drop);
        w.add(100, 1).unwrap();
        let flushes = w.advance(3_000);
        let starts: Vec<_> = flushes.iter().map(|f| f.start).collect();
        assert_eq!(starts, vec![0, 1_000, 2_000]);
        assert!(flushes[1].state.is_empty());
        assert_eq!(w.current_start(), Some(3_000));
    }

    #[test]
    fn test_late_event_dropped() {
        let mut w = window(false, LateEventPolicy::Drop);
        w.add(1_100, 1).unwrap();
        w.advance(2_000);

        let err = w.add(1_500, 2).unwrap_err();
        assert_matches!(
            err,
            WindowError::LateEvent {
                timestamp: 1_500,
                closed_until: 2_000
            }
        );
        assert!(w.current_start().is_none());

        // Item in the open window's past while a later window is open
        w.add(2_500, 3).unwrap();
        assert_matches!(w.add(1_999, 4), Err(WindowError::LateEvent { .. }));
        assert_eq!(w.current(), Some(&vec![3]));
    }

    #[test]
    fn test_late_event_merged_into_current() {
        let mut w = window(false, LateEventPolicy::MergeIntoCurrent);
        w.add(1_100, 1).unwrap();
        w.add(2_200, 2).unwrap();
        assert!(w.add(1_300, 3).unwrap().is_empty());
        assert_eq!(w.current(), Some(&vec![2, 3]));

        w.advance(3_000);
        w.add(1_000, 4).unwrap();
        assert_eq!(w.current_start(), Some(3_000));
        assert_eq!(w.current(), Some(&vec![4]));
    }

    #[test]
    fn test_check_matches_add_without_mutating() {
        let mut w = window(false, LateEventPolicy::Drop);
        assert_eq!(w.floor(), None);
        w.add(1_100, 1).unwrap();
        w.advance(2_000);
        assert_eq!(w.floor(), Some(2_000));

        assert_matches!(w.check(1_500), Err(WindowError::LateEvent { .. }));
        assert_eq!(w.check(2_400), Ok(2_000));
        assert!(w.current_start().is_none());

        let merging = window(false, LateEventPolicy::MergeIntoCurrent);
        assert_eq!(merging.check(1_500), Ok(1_000));
    }

    #[test]
    fn test_flush_closes_open_window() {
        let mut w = window(false, LateEventPolicy::Drop);
        w.add(10, 1).unwrap();
        let flush = w.flush().unwrap();
        assert_eq!(flush.state, vec![1]);
        assert!(w.flush().is_none());
    }
}
