//! Windowing primitives
//!
//! Windows are driven by event time. Every window exposes `add`, which may
//! close earlier windows first, and `advance(now)`, which fires the timers
//! that are due. Closed windows come back as [`WindowFlush`] values; the
//! caller decides what to publish.
//!
//! Rejected items never mutate window state. Each window keeps a floor
//! that outlives its flushes; `check` tests an item against it without
//! touching anything, so a caller can vet an item against several windows
//! before applying it to any.

use common::TimestampMs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod session;
pub mod sliding;
pub mod tumbling;

pub use session::SessionWindow;
pub use sliding::SlidingWindow;
pub use tumbling::TumblingWindow;

/// Window variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Tumbling,
    Sliding,
    Session,
}

impl WindowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowKind::Tumbling => "tumbling",
            WindowKind::Sliding => "sliding",
            WindowKind::Session => "session",
        }
    }
}

impl std::fmt::Display for WindowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons a window refuses an item
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    /// Timestamp runs backwards relative to the window, giving a negative duration
    #[error("{kind} window: item at {timestamp} precedes {watermark}")]
    Misaligned {
        kind: WindowKind,
        timestamp: TimestampMs,
        watermark: TimestampMs,
    },

    /// Tumbling window for this timestamp has already been flushed
    #[error("item at {timestamp} is late; windows before {closed_until} are flushed")]
    LateEvent {
        timestamp: TimestampMs,
        closed_until: TimestampMs,
    },

    /// Size, slide or gap is not positive
    #[error("{kind} window: {field} must be positive")]
    InvalidSize { kind: WindowKind, field: &'static str },
}

impl WindowError {
    /// Short label for metrics
    pub fn reason(&self) -> &'static str {
        match self {
            WindowError::Misaligned { .. } => "misaligned",
            WindowError::LateEvent { .. } => "late",
            WindowError::InvalidSize { .. } => "invalid_size",
        }
    }

    /// Window that refused the item
    pub fn kind(&self) -> WindowKind {
        match self {
            WindowError::Misaligned { kind, .. } | WindowError::InvalidSize { kind, .. } => *kind,
            WindowError::LateEvent { .. } => WindowKind::Tumbling,
        }
    }
}

pub type WindowResult<T> = std::result::Result<T, WindowError>;

/// A closed window and what it accumulated
#[derive(Debug, Clone, PartialEq)]
pub struct WindowFlush<S> {
    pub kind: WindowKind,
    /// Inclusive start
    pub start: TimestampMs,
    /// Exclusive end (session: last activity plus gap)
    pub end: TimestampMs,
    pub state: S,
}

/// Per-window state folded by a tumbling window
pub trait Accumulator {
    type Item;

    /// Fresh state for the window starting at `window_start`
    fn open(window_start: TimestampMs) -> Self;

    fn accumulate(&mut self, timestamp: TimestampMs, item: Self::Item);

    fn is_empty(&self) -> bool;
}

/// Collects the raw items
impl<T> Accumulator for Vec<T> {
    type Item = T;

    fn open(_window_start: TimestampMs) -> Self {
        Vec::new()
    }

    fn accumulate(&mut self, _timestamp: TimestampMs, item: T) {
        self.push(item);
    }

    fn is_empty(&self) -> bool {
        Vec::is_empty(self)
    }
}

/// Start of the `size`-aligned bucket containing `ts` (floor, also for negatives)
pub fn align_down(ts: TimestampMs, size: i64) -> TimestampMs {
    ts.div_euclid(size) * size
}

pub(crate) fn positive_ms(
    value: u64,
    kind: WindowKind,
    field: &'static str,
) -> WindowResult<i64> {
    match i64::try_from(value) {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(WindowError::InvalidSize { kind, field }),
    }
}
