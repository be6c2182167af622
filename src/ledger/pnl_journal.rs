use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::instrument;
use uuid::Uuid;

use crate::core::types::{TradeLog, TradeStatus};
use crate::store::{RelationalStore, StoreError};

/// Durable trade journal writer. Every status transition away from Open
/// sets exit time and realized P&L atomically, via a single `UPDATE`.
pub struct PnlJournal {
    store: Arc<RelationalStore>,
}

impl PnlJournal {
    pub fn new(store: Arc<RelationalStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, trade))]
    pub async fn record_entry(&self, trade: &TradeLog) -> Result<(), StoreError> {
        self.store.insert_trade_log(trade).await
    }

    #[instrument(skip(self))]
    #[allow(clippy::too_many_arguments)]
    pub async fn record_exit(
        &self,
        trade_id: Uuid,
        exit_price: Decimal,
        exit_tier: &str,
        realized_pnl: Decimal,
        pnl_pct: Decimal,
        status: TradeStatus,
        slippage_actual: Option<Decimal>,
    ) -> Result<(), StoreError> {
        self.store
            .close_trade_log(trade_id, exit_price, exit_tier, realized_pnl, pnl_pct, status, slippage_actual)
            .await
    }
}
