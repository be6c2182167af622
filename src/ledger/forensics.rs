use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::instrument;
use uuid::Uuid;

use crate::store::models::TradeForensicsRow;
use crate::store::{RelationalStore, StoreError};

const RUG_PULL_LOSS_PCT: Decimal = dec!(-0.80);
const BAD_SIGNAL_LOSS_FLOOR: Decimal = dec!(-0.30);
const BAD_SIGNAL_LOSS_CEIL: Decimal = dec!(-0.10);
const SLIPPAGE_DEVIATION_PCT: Decimal = dec!(0.05);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    RugPullSimMissed,
    RugPull,
    Slippage,
    BadSignal,
    Unknown,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RugPullSimMissed => "rug_pull_sim_missed",
            Self::RugPull => "rug_pull",
            Self::Slippage => "slippage",
            Self::BadSignal => "bad_signal",
            Self::Unknown => "unknown",
        }
    }
}

/// Inputs the classifier needs about one closed, losing trade.
pub struct ForensicInput {
    pub trade_id: Uuid,
    pub loss_pct: Decimal,
    pub was_simulation_run: bool,
    pub simulation_flagged_safe: bool,
    pub time_since_simulation_secs: Option<i64>,
    pub slippage_expected: Option<Decimal>,
    pub slippage_actual: Option<Decimal>,
    pub signal_confidence: Option<f64>,
}

/// Post-hoc classifier for closed losing trades. Evaluated in a fixed
/// priority order; the first matching rule wins.
pub struct Forensics {
    store: Arc<RelationalStore>,
}

impl Forensics {
    pub fn new(store: Arc<RelationalStore>) -> Self {
        Self { store }
    }

    /// Pure rule evaluation, independent of persistence.
    pub fn classify(input: &ForensicInput) -> FailureCategory {
        if input.loss_pct <= RUG_PULL_LOSS_PCT {
            if input.was_simulation_run && input.simulation_flagged_safe {
                return FailureCategory::RugPullSimMissed;
            }
            if !input.was_simulation_run {
                return FailureCategory::RugPull;
            }
        }
        if let (Some(expected), Some(actual)) = (input.slippage_expected, input.slippage_actual) {
            if (actual - expected).abs() > SLIPPAGE_DEVIATION_PCT {
                return FailureCategory::Slippage;
            }
        }
        if input.loss_pct > BAD_SIGNAL_LOSS_FLOOR && input.loss_pct <= BAD_SIGNAL_LOSS_CEIL {
            return FailureCategory::BadSignal;
        }
        FailureCategory::Unknown
    }

    #[instrument(skip(self, input))]
    pub async fn record(&self, input: ForensicInput, detected_at: DateTime<Utc>) -> Result<FailureCategory, StoreError> {
        let category = Self::classify(&input);
        let row = TradeForensicsRow {
            forensic_id: Uuid::new_v4(),
            trade_id: input.trade_id,
            failure_category: category.as_str().to_string(),
            detected_at,
            details: serde_json::json!({ "loss_pct": input.loss_pct.to_string() }),
            was_simulation_run: input.was_simulation_run,
            simulation_result: if input.was_simulation_run {
                Some(if input.simulation_flagged_safe { "safe".to_string() } else { "unsafe".to_string() })
            } else {
                None
            },
            time_since_simulation: input.time_since_simulation_secs,
            expected_output: input.slippage_expected,
            actual_output: input.slippage_actual,
            slippage_pct: match (input.slippage_expected, input.slippage_actual) {
                (Some(e), Some(a)) => Some(a - e),
                _ => None,
            },
            signal_confidence: input.signal_confidence,
        };
        self.store.insert_forensics(&row).await?;
        Ok(category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input() -> ForensicInput {
        ForensicInput {
            trade_id: Uuid::new_v4(),
            loss_pct: dec!(-0.20),
            was_simulation_run: true,
            simulation_flagged_safe: true,
            time_since_simulation_secs: Some(60),
            slippage_expected: Some(dec!(0.01)),
            slippage_actual: Some(dec!(0.012)),
            signal_confidence: Some(0.8),
        }
    }

    #[test]
    fn deep_loss_with_safe_sim_is_rug_pull_sim_missed() {
        let input = ForensicInput { loss_pct: dec!(-0.85), ..base_input() };
        assert_eq!(Forensics::classify(&input), FailureCategory::RugPullSimMissed);
    }

    #[test]
    fn deep_loss_without_sim_is_rug_pull() {
        let input = ForensicInput {
            loss_pct: dec!(-0.85),
            was_simulation_run: false,
            simulation_flagged_safe: false,
            ..base_input()
        };
        assert_eq!(Forensics::classify(&input), FailureCategory::RugPull);
    }

    #[test]
    fn large_slippage_deviation_outranks_bad_signal() {
        let input = ForensicInput {
            loss_pct: dec!(-0.15),
            slippage_expected: Some(dec!(0.01)),
            slippage_actual: Some(dec!(0.09)),
            ..base_input()
        };
        assert_eq!(Forensics::classify(&input), FailureCategory::Slippage);
    }

    #[test]
    fn moderate_loss_with_clean_slippage_is_bad_signal() {
        let input = ForensicInput { loss_pct: dec!(-0.20), ..base_input() };
        assert_eq!(Forensics::classify(&input), FailureCategory::BadSignal);
    }

    #[test]
    fn shallow_loss_is_unknown() {
        let input = ForensicInput { loss_pct: dec!(-0.05), ..base_input() };
        assert_eq!(Forensics::classify(&input), FailureCategory::Unknown);
    }

    #[test]
    fn deep_loss_with_sim_flagged_unsafe_falls_through_to_later_rules() {
        let input = ForensicInput {
            loss_pct: dec!(-0.85),
            was_simulation_run: true,
            simulation_flagged_safe: false,
            ..base_input()
        };
        assert_eq!(Forensics::classify(&input), FailureCategory::Unknown);
    }
}
