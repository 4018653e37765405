use async_trait::async_trait;
use parking_lot::RwLock;

use crate::types::Position;
use crate::Result;

/// Pull side of the position feed; positions are owned by the caller
///
/// Push-style feeds call [`crate::RiskEngine::upsert_position`] directly.
#[async_trait]
pub trait PositionFeed: Send + Sync {
    /// Current positions, complete
    async fn fetch_positions(&self) -> Result<Vec<Position>>;
}

/// A feed backed by an in-process list
#[derive(Default)]
pub struct StaticPositionFeed {
    positions: RwLock<Vec<Position>>,
}

impl StaticPositionFeed {
    pub fn new(positions: Vec<Position>) -> Self {
        Self {
            positions: RwLock::new(positions),
        }
    }

    pub fn set(&self, positions: Vec<Position>) {
        *self.positions.write() = positions;
    }
}

#[async_trait]
impl PositionFeed for StaticPositionFeed {
    async fn fetch_positions(&self) -> Result<Vec<Position>> {
        Ok(self.positions.read().clone())
    }
}
