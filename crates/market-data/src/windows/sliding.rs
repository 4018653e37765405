//! Overlapping windows with per-item eviction

use std::collections::VecDeque;

use common::TimestampMs;

use super::{align_down, positive_ms, WindowError, WindowFlush, WindowKind, WindowResult};

/// Sliding window of `size` evaluated every `slide`
///
/// Members live in `[boundary - size, boundary)` when a slide boundary
/// fires. Timestamps must be non-decreasing; the member list is only ever
/// trimmed from the front, never reset.
#[derive(Debug)]
pub struct SlidingWindow<T> {
    size: i64,
    slide: i64,
    members: VecDeque<(TimestampMs, T)>,
    next_boundary: Option<TimestampMs>,
    /// Newest item ever added
    latest: Option<TimestampMs>,
    /// Last slide boundary evaluated, kept while the window is idle
    evaluated: Option<TimestampMs>,
}

impl<T: Clone> SlidingWindow<T> {
    pub fn new(size_ms: u64, slide_ms: u64) -> WindowResult<Self> {
        Ok(Self {
            size: positive_ms(size_ms, WindowKind::Sliding, "size")?,
            slide: positive_ms(slide_ms, WindowKind::Sliding, "slide")?,
            members: VecDeque::new(),
            next_boundary: None,
            latest: None,
            evaluated: None,
        })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Newest member timestamp
    pub fn watermark(&self) -> Option<TimestampMs> {
        self.members.back().map(|(ts, _)| *ts)
    }

    /// Earliest timestamp the window still accepts
    ///
    /// Neither an idle window nor a flushed one forgets it.
    pub fn floor(&self) -> Option<TimestampMs> {
        match (self.latest, self.evaluated) {
            (Some(latest), Some(boundary)) => Some(latest.max(boundary)),
            (latest, boundary) => latest.or(boundary),
        }
    }

    pub fn check(&self, timestamp: TimestampMs) -> WindowResult<()> {
        match self.floor() {
            Some(floor) if timestamp < floor => Err(WindowError::Misaligned {
                kind: WindowKind::Sliding,
                timestamp,
                watermark: floor,
            }),
            _ => Ok(()),
        }
    }

    /// Add an item, firing the slide boundaries it passes first
    pub fn add(&mut self, timestamp: TimestampMs, item: T) -> WindowResult<Vec<WindowFlush<Vec<(TimestampMs, T)>>>> {
        self.check(timestamp)?;

        let flushes = self.advance(timestamp);
        if self.next_boundary.is_none() {
            self.next_boundary = Some(align_down(timestamp, self.slide) + self.slide);
        }
        self.members.push_back((timestamp, item));
        self.latest = Some(timestamp);
        Ok(flushes)
    }

    /// Fire every slide boundary at or before `now`
    ///
    /// Each boundary evicts members older than `boundary - size` and emits
    /// the remaining members, if any.
    pub fn advance(&mut self, now: TimestampMs) -> Vec<WindowFlush<Vec<(TimestampMs, T)>>> {
        let mut flushes = Vec::new();

        while let Some(boundary) = self.next_boundary {
            if boundary > now {
                break;
            }

            let start = boundary - self.size;
            self.evict_before(start);
            self.evaluated = Some(boundary);

            if self.members.is_empty() {
                // Nothing left to observe until the next item arrives
                self.next_boundary = None;
                break;
            }

            flushes.push(WindowFlush {
                kind: WindowKind::Sliding,
                start,
                end: boundary,
                state: self.members.iter().cloned().collect(),
            });
            self.next_boundary = Some(boundary + self.slide);
        }

        flushes
    }

    fn evict_before(&mut self, start: TimestampMs) {
        while matches!(self.members.front(), Some((ts, _)) if *ts < start) {
            self.members.pop_front();
        }
    }

    /// Emit the current member set without evicting (end of stream)
    pub fn flush(&mut self) -> Option<WindowFlush<Vec<(TimestampMs, T)>>> {
        let end = self.watermark()? + 1;
        let start = end - self.size;
        self.evict_before(start);
        self.next_boundary = None;
        Some(WindowFlush {
            kind: WindowKind::Sliding,
            start,
            end,
            state: self.members.drain(..).collect(),
        })
    }
}
