//! Topic names and subscription filters
//!
//! Topics are colon separated: `trade:AAPL`, `candle:1m:AAPL`,
//! `greeks:portfolio`. The first segment is the topic family.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Wildcard that matches every topic
pub const WILDCARD: &str = "*";

/// A concrete topic an event is published on
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Parse and validate a topic name
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::invalid_topic("topic is empty"));
        }
        if raw.contains('*') {
            return Err(Error::invalid_topic(format!(
                "'{}' contains a wildcard; use TopicFilter for subscriptions",
                raw
            )));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(Error::invalid_topic(format!("'{}' contains whitespace", raw)));
        }
        if raw.split(':').any(str::is_empty) {
            return Err(Error::invalid_topic(format!("'{}' has an empty segment", raw)));
        }
        Ok(Self(raw.to_string()))
    }

    /// `trade:<symbol>`
    pub fn trade(symbol: &str) -> Self {
        Self(format!("trade:{}", symbol))
    }

    /// `quote:<symbol>`
    pub fn quote(symbol: &str) -> Self {
        Self(format!("quote:{}", symbol))
    }

    /// `option:<symbol>`
    pub fn option(symbol: &str) -> Self {
        Self(format!("option:{}", symbol))
    }

    /// `candle:<timeframe>:<symbol>`
    pub fn candle(timeframe: &str, symbol: &str) -> Self {
        Self(format!("candle:{}:{}", timeframe, symbol))
    }

    /// `vwap:<symbol>`
    pub fn vwap(symbol: &str) -> Self {
        Self(format!("vwap:{}", symbol))
    }

    /// `indicators:<timeframe>:<symbol>`
    pub fn indicators(timeframe: &str, symbol: &str) -> Self {
        Self(format!("indicators:{}:{}", timeframe, symbol))
    }

    /// `stats:<symbol>` (rolling sliding-window statistics)
    pub fn stats(symbol: &str) -> Self {
        Self(format!("stats:{}", symbol))
    }

    /// `session:<symbol>` (closed activity sessions)
    pub fn session(symbol: &str) -> Self {
        Self(format!("session:{}", symbol))
    }

    /// `pl:<positionId>`
    pub fn pl(position_id: &str) -> Self {
        Self(format!("pl:{}", position_id))
    }

    /// `greeks:portfolio`
    pub fn greeks_portfolio() -> Self {
        Self("greeks:portfolio".to_string())
    }

    /// The topic family (first segment), e.g. `candle`
    pub fn family(&self) -> &str {
        self.0.split(':').next().unwrap_or(&self.0)
    }

    /// Get the topic as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Topic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// What a subscriber wants to receive
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicFilter {
    /// Every topic, in dispatch order
    All,
    /// One exact topic
    Exact(Topic),
    /// Every topic starting with the prefix (`candle:*` -> `candle:`)
    Prefix(String),
}

impl TopicFilter {
    /// Parse `*`, `family:*` or an exact topic
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw == WILDCARD {
            return Ok(Self::All);
        }
        if let Some(prefix) = raw.strip_suffix(WILDCARD) {
            if prefix.is_empty() || prefix.contains('*') || !prefix.ends_with(':') {
                return Err(Error::invalid_topic(format!(
                    "'{}' is not a valid wildcard filter",
                    raw
                )));
            }
            return Ok(Self::Prefix(prefix.to_string()));
        }
        Topic::parse(raw).map(Self::Exact)
    }

    /// Check whether an event on `topic` should be delivered
    pub fn matches(&self, topic: &Topic) -> bool {
        match self {
            TopicFilter::All => true,
            TopicFilter::Exact(t) => t == topic,
            TopicFilter::Prefix(prefix) => topic.as_str().starts_with(prefix.as_str()),
        }
    }
}

impl From<Topic> for TopicFilter {
    fn from(topic: Topic) -> Self {
        Self::Exact(topic)
    }
}

impl std::fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopicFilter::All => write!(f, "{}", WILDCARD),
            TopicFilter::Exact(t) => write!(f, "{}", t),
            TopicFilter::Prefix(p) => write!(f, "{}{}", p, WILDCARD),
        }
    }
}
