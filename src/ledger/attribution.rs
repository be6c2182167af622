use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::instrument;

use crate::core::types::{SourceStats, TradeStatus};
use crate::store::{RelationalStore, StoreError};

/// Per-signal-source win rate / P&L rollups, folded purely from closed
/// `TradeLog` rows — no running counters to drift out of sync with the
/// journal.
pub struct Attribution {
    store: Arc<RelationalStore>,
}

impl Attribution {
    pub fn new(store: Arc<RelationalStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn rollup(&self, source_id: &str) -> Result<SourceStats, StoreError> {
        let rows = self.store.closed_trades_for_source(source_id).await?;
        let stats = Self::fold(source_id, &rows.into_iter().map(|r| (r.realized_pnl, r.status, r.exit_time)).collect::<Vec<_>>());
        self.store.upsert_attribution(&stats).await?;
        Ok(stats)
    }

    /// Pure fold over closed-trade rows, exercised directly in tests.
    pub fn fold(
        source_id: &str,
        rows: &[(Option<Decimal>, String, Option<chrono::DateTime<chrono::Utc>>)],
    ) -> SourceStats {
        let mut stats = SourceStats { source_id: source_id.to_string(), ..Default::default() };
        for (pnl, status, exit_time) in rows {
            let Some(pnl) = pnl else { continue };
            stats.total_trades += 1;
            if *pnl >= Decimal::ZERO {
                stats.winning_trades += 1;
            } else {
                stats.losing_trades += 1;
            }
            stats.total_pnl += *pnl;
            stats.best_trade_pnl = Some(stats.best_trade_pnl.map_or(*pnl, |b| b.max(*pnl)));
            stats.worst_trade_pnl = Some(stats.worst_trade_pnl.map_or(*pnl, |w| w.min(*pnl)));
            if exit_time.is_some() {
                stats.last_trade_time = *exit_time;
            }
            let _ = status;
        }
        stats
    }
}

#[allow(dead_code)]
fn is_closed(status: &TradeStatus) -> bool {
    !matches!(status, TradeStatus::Open)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn win_rate_reflects_signed_pnl_rows() {
        let rows = vec![
            (Some(dec!(10)), "Closed".to_string(), None),
            (Some(dec!(-5)), "StoppedOut".to_string(), None),
            (Some(dec!(20)), "Closed".to_string(), None),
        ];
        let stats = Attribution::fold("cluster-1", &rows);
        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.winning_trades, 2);
        assert_eq!(stats.losing_trades, 1);
        assert_eq!(stats.total_pnl, dec!(25));
        assert!((stats.win_rate() - (2.0 / 3.0)).abs() < 1e-9);
    }
}
