//! Common types and utilities for the stream engine
//!
//! This crate provides shared identifiers, topics and the canonical
//! stream event envelope used across all engine crates.
//!
//! # Modules
//!
//! - [`error`] - Common error types
//! - [`types`] - Identifiers and shared enums (EventId, CorrelationId, PositionSide, ...)
//! - [`topic`] - Topic names and subscription filters
//! - [`event`] - The immutable [`StreamEvent`] envelope

pub mod error;
pub mod event;
pub mod topic;
pub mod types;

pub use error::{Error, Result};
pub use event::StreamEvent;
pub use topic::{Topic, TopicFilter};
pub use types::*;
