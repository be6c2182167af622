use std::collections::HashMap;

use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::instrument;
use uuid::Uuid;

use crate::core::types::Position;

/// In-memory open positions, guarded by a single lock. Mutations never
/// suspend: callers do I/O before or after touching the book, never
/// across it.
pub struct PositionBook {
    positions: RwLock<HashMap<Uuid, Position>>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self { positions: RwLock::new(HashMap::new()) }
    }

    #[instrument(skip(self, position), fields(trade_id = %position.trade_id))]
    pub async fn open(&self, position: Position) {
        self.positions.write().await.insert(position.trade_id, position);
    }

    pub async fn get(&self, trade_id: Uuid) -> Option<Position> {
        self.positions.read().await.get(&trade_id).cloned()
    }

    pub async fn open_positions(&self) -> Vec<Position> {
        self.positions.read().await.values().cloned().collect()
    }

    pub async fn open_position_ids(&self) -> Vec<Uuid> {
        self.positions.read().await.keys().copied().collect()
    }

    /// Reduces `remaining_fraction` by `sell_fraction` of the current
    /// remaining share and updates the last observed price. Returns the
    /// updated position, or `None` if the trade isn't open.
    #[instrument(skip(self))]
    pub async fn apply_partial_sell(
        &self,
        trade_id: Uuid,
        sell_fraction: Decimal,
        observed_price: Decimal,
    ) -> Option<Position> {
        let mut positions = self.positions.write().await;
        let position = positions.get_mut(&trade_id)?;
        position.remaining_fraction *= Decimal::ONE - sell_fraction;
        position.last_observed_price = observed_price;
        Some(position.clone())
    }

    /// Removes a position from the book once it has closed.
    pub async fn close(&self, trade_id: Uuid) -> Option<Position> {
        self.positions.write().await.remove(&trade_id)
    }

    pub async fn has_open_position_for_mint(&self, token_mint: &str) -> bool {
        self.positions.read().await.values().any(|p| p.token_mint == token_mint)
    }
}

impl Default for PositionBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SignalSource;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn sample_position(trade_id: Uuid) -> Position {
        Position {
            trade_id,
            token_mint: "mint1".into(),
            sub_wallet_id: Uuid::new_v4(),
            sub_wallet_address: "wallet1".into(),
            entry_price: dec!(1),
            token_amount_at_entry: dec!(100),
            remaining_fraction: dec!(1),
            entry_time: Utc::now(),
            last_observed_price: dec!(1),
            source: SignalSource::Cabal,
        }
    }

    #[tokio::test]
    async fn remaining_fraction_is_monotone_non_increasing() {
        let book = PositionBook::new();
        let trade_id = Uuid::new_v4();
        book.open(sample_position(trade_id)).await;

        book.apply_partial_sell(trade_id, dec!(0.5), dec!(2)).await;
        let after_first = book.get(trade_id).await.unwrap().remaining_fraction;
        assert_eq!(after_first, dec!(0.5));

        book.apply_partial_sell(trade_id, dec!(0.5), dec!(5)).await;
        let after_second = book.get(trade_id).await.unwrap().remaining_fraction;
        assert_eq!(after_second, dec!(0.25));
        assert!(after_second <= after_first);
    }

    #[tokio::test]
    async fn close_removes_from_book() {
        let book = PositionBook::new();
        let trade_id = Uuid::new_v4();
        book.open(sample_position(trade_id)).await;
        assert!(book.close(trade_id).await.is_some());
        assert!(book.get(trade_id).await.is_none());
    }
}
