use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{instrument, warn};

use crate::core::types::{RiskClass, SimulationResult};
use crate::execution::router::QuoteClient;
use crate::store::{RelationalStore, StoreError};

const IN_MEMORY_TTL: Duration = Duration::from_secs(5 * 60);
const STORE_FRESHNESS: chrono::Duration = chrono::Duration::hours(1);
const PROBE_BASE_UNITS: u64 = 1_000_000_000;

struct CacheEntry {
    result: SimulationResult,
    cached_at: Instant,
}

/// Pre-flight buy/transfer/sell safety check. Never signals safe on an
/// exception path: any failure to reach a verdict yields `Unknown`.
pub struct Simulator {
    quote_client: Arc<dyn QuoteClient>,
    cache: DashMap<String, CacheEntry>,
    store: Arc<RelationalStore>,
}

impl Simulator {
    pub fn new(quote_client: Arc<dyn QuoteClient>, store: Arc<RelationalStore>) -> Self {
        Self {
            quote_client,
            cache: DashMap::new(),
            store,
        }
    }

    /// Pure classification law from (buy_tax, sell_tax, transfer_blocked,
    /// sell_blocked, sell_error), evaluated in the fixed order from the spec.
    pub fn classify(
        buy_tax: Decimal,
        sell_tax: Decimal,
        transfer_blocked: bool,
        sell_blocked: bool,
        sell_error: bool,
    ) -> RiskClass {
        if transfer_blocked || sell_blocked || sell_tax > dec!(0.50) {
            return RiskClass::Honeypot;
        }
        if sell_error {
            return RiskClass::Unknown;
        }
        if buy_tax < dec!(0.05) && sell_tax < dec!(0.05) {
            return RiskClass::Safe;
        }
        if sell_tax < dec!(0.15) {
            return RiskClass::Caution;
        }
        if sell_tax < dec!(0.50) {
            return RiskClass::HighRisk;
        }
        RiskClass::Unknown
    }

    #[instrument(skip(self))]
    pub async fn simulate_token(&self, token_mint: &str) -> SimulationResult {
        if let Some(entry) = self.cache.get(token_mint) {
            if entry.cached_at.elapsed() < IN_MEMORY_TTL {
                return entry.result.clone();
            }
        }

        let result = self.run_simulation(token_mint).await;
        self.cache.insert(
            token_mint.to_string(),
            CacheEntry { result: result.clone(), cached_at: Instant::now() },
        );
        if let Err(err) = self.store.upsert_sim_result(&result).await {
            warn!(%err, token_mint, "failed to persist simulation result");
        }
        result
    }

    async fn run_simulation(&self, token_mint: &str) -> SimulationResult {
        let base_mint = "So11111111111111111111111111111111111111112";

        let buy = self.quote_client.quote(base_mint, token_mint, PROBE_BASE_UNITS, 1).await;
        let (buy_success, buy_tax) = match &buy {
            Ok(route) => (true, route.price_impact_pct.abs()),
            Err(_) => (false, Decimal::ZERO),
        };

        let transfer_blocked = match self.quote_client.simulate_transfer(token_mint).await {
            Ok(blocked) => blocked,
            Err(err) => {
                warn!(%err, token_mint, "transfer simulation unavailable, treating as not blocked");
                false
            }
        };

        let sell = if buy_success {
            self.quote_client.quote(token_mint, base_mint, PROBE_BASE_UNITS, 1).await
        } else {
            Err(crate::execution::router::RouterError::NoRoute {
                input_mint: token_mint.to_string(),
                output_mint: base_mint.to_string(),
            })
        };
        let (sell_success, sell_tax, sell_blocked, sell_error) = match &sell {
            Ok(route) => (true, route.price_impact_pct.abs(), false, false),
            Err(crate::execution::router::RouterError::NoRoute { .. }) => {
                (false, Decimal::ZERO, true, false)
            }
            Err(_) => (false, Decimal::ZERO, false, true),
        };

        let risk_class = Self::classify(buy_tax, sell_tax, transfer_blocked, sell_blocked, sell_error);
        let is_honeypot = matches!(risk_class, RiskClass::Honeypot);

        SimulationResult {
            token_mint: token_mint.to_string(),
            buy_success,
            sell_success,
            transfer_blocked,
            sell_blocked,
            buy_tax,
            sell_tax,
            is_honeypot,
            risk_class,
            sim_time: Utc::now(),
        }
    }

    #[instrument(skip(self))]
    pub async fn is_honeypot(&self, token_mint: &str) -> bool {
        match self.store.sim_result(token_mint).await {
            Ok(Some(row)) if Utc::now() - row.sim_time < STORE_FRESHNESS => row.is_honeypot,
            Ok(_) => self.simulate_token(token_mint).await.is_honeypot,
            Err(err) => {
                warn!(%err, token_mint, "store unavailable for honeypot check, forcing fresh simulation");
                self.simulate_token(token_mint).await.is_honeypot
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_honeypot_on_blocked_transfer() {
        let class = Simulator::classify(dec!(0.01), dec!(0.01), true, false, false);
        assert_eq!(class, RiskClass::Honeypot);
    }

    #[test]
    fn classify_honeypot_on_high_sell_tax() {
        let class = Simulator::classify(dec!(0.01), dec!(0.60), false, false, false);
        assert_eq!(class, RiskClass::Honeypot);
    }

    #[test]
    fn classify_unknown_on_sell_error() {
        let class = Simulator::classify(dec!(0.01), dec!(0.0), false, false, true);
        assert_eq!(class, RiskClass::Unknown);
    }

    #[test]
    fn classify_safe_under_five_percent_both_legs() {
        let class = Simulator::classify(dec!(0.02), dec!(0.03), false, false, false);
        assert_eq!(class, RiskClass::Safe);
    }

    #[test]
    fn classify_caution_between_five_and_fifteen_percent() {
        let class = Simulator::classify(dec!(0.02), dec!(0.10), false, false, false);
        assert_eq!(class, RiskClass::Caution);
    }

    #[test]
    fn classify_high_risk_between_fifteen_and_fifty_percent() {
        let class = Simulator::classify(dec!(0.02), dec!(0.30), false, false, false);
        assert_eq!(class, RiskClass::HighRisk);
    }
}
