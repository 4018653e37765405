//! Activity-bounded windows

use common::TimestampMs;

use super::{positive_ms, WindowError, WindowFlush, WindowKind, WindowResult};

/// Session window closed by `gap` ms of inactivity
///
/// The session closes exactly `gap` after its last item. An item arriving
/// at or after that instant closes the old session and opens a new one.
#[derive(Debug)]
pub struct SessionWindow<T> {
    gap: i64,
    items: Vec<(TimestampMs, T)>,
    start: Option<TimestampMs>,
    last_activity: Option<TimestampMs>,
    /// End of the last closed session
    closed_until: Option<TimestampMs>,
}

impl<T> SessionWindow<T> {
    pub fn new(gap_ms: u64) -> WindowResult<Self> {
        Ok(Self {
            gap: positive_ms(gap_ms, WindowKind::Session, "gap")?,
            items: Vec::new(),
            start: None,
            last_activity: None,
            closed_until: None,
        })
    }

    pub fn gap_ms(&self) -> i64 {
        self.gap
    }

    pub fn is_open(&self) -> bool {
        self.last_activity.is_some()
    }

    /// When the open session will close if nothing else arrives
    pub fn deadline(&self) -> Option<TimestampMs> {
        self.last_activity.map(|last| last + self.gap)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Earliest timestamp the window still accepts
    ///
    /// Survives the session closing, so a closed stretch of time cannot be
    /// reopened by an older item.
    pub fn floor(&self) -> Option<TimestampMs> {
        self.last_activity.or(self.closed_until)
    }

    pub fn check(&self, timestamp: TimestampMs) -> WindowResult<()> {
        match self.floor() {
            Some(floor) if timestamp < floor => Err(WindowError::Misaligned {
                kind: WindowKind::Session,
                timestamp,
                watermark: floor,
            }),
            _ => Ok(()),
        }
    }

    /// Extend the open session, or close it and start a new one
    pub fn add(&mut self, timestamp: TimestampMs, item: T) -> WindowResult<Option<WindowFlush<Vec<(TimestampMs, T)>>>> {
        self.check(timestamp)?;

        let closed = self.advance(timestamp);
        if self.start.is_none() {
            self.start = Some(timestamp);
        }
        self.last_activity = Some(timestamp);
        self.items.push((timestamp, item));
        Ok(closed)
    }

    /// Close the session if its inactivity deadline is at or before `now`
    pub fn advance(&mut self, now: TimestampMs) -> Option<WindowFlush<Vec<(TimestampMs, T)>>> {
        match self.deadline() {
            Some(deadline) if deadline <= now => self.flush(),
            _ => None,
        }
    }

    /// Close the open session regardless of time (end of stream)
    pub fn flush(&mut self) -> Option<WindowFlush<Vec<(TimestampMs, T)>>> {
        let end = self.deadline()?;
        let start = self.start.take()?;
        self.last_activity = None;
        self.closed_until = Some(end);
        Some(WindowFlush {
            kind: WindowKind::Session,
            start,
            end,
            state: std::mem::take(&mut self.items),
        })
    }
}
