use std::collections::HashSet;

use rust_decimal::Decimal;
use tracing::{instrument, warn};

use crate::core::types::{ChainEvent, EventKind};
use crate::ingest::transport::RawChainUpdate;

/// Single interface over both ingestion transports. Turns a raw, failed-or-not
/// transaction frame into zero or one [`ChainEvent`]; failed transactions are
/// dropped, never surfaced as an error.
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip(self, update), fields(tx_hash = %update.tx_hash))]
    pub fn normalize(&self, update: RawChainUpdate) -> Option<ChainEvent> {
        if !update.succeeded {
            warn!(tx_hash = %update.tx_hash, "dropping failed transaction");
            return None;
        }

        let kind = Self::classify(&update);
        let (input_mint, output_mint, input_amount, output_amount) = match kind {
            EventKind::Swap => Self::swap_legs(&update),
            EventKind::Transfer => (None, None, None, Self::transfer_amount_in(&update)),
            EventKind::ProgramInteraction => (None, None, None, None),
        };

        Some(ChainEvent {
            kind,
            tx_id: update.tx_hash,
            slot: update.slot,
            timestamp: update.block_time.unwrap_or_else(chrono::Utc::now),
            wallet: update.fee_payer,
            program_id: update.program_ids.first().cloned(),
            input_mint,
            output_mint,
            input_amount,
            output_amount,
            fee_lamports: None,
        })
    }

    /// A swap is a transaction whose token deltas show exactly one negative
    /// and one positive side for two distinct mints.
    fn classify(update: &RawChainUpdate) -> EventKind {
        if Self::is_swap(update) {
            return EventKind::Swap;
        }
        if update.program_ids.is_empty() {
            return EventKind::Transfer;
        }
        EventKind::ProgramInteraction
    }

    fn is_swap(update: &RawChainUpdate) -> bool {
        if update.token_deltas.len() != 2 {
            return false;
        }
        let mints: HashSet<&String> = update.token_deltas.iter().map(|(mint, _, _)| mint).collect();
        if mints.len() != 2 {
            return false;
        }
        let negatives = update.token_deltas.iter().filter(|(_, _, amount)| *amount < Decimal::ZERO).count();
        let positives = update.token_deltas.iter().filter(|(_, _, amount)| *amount > Decimal::ZERO).count();
        negatives == 1 && positives == 1
    }

    /// Amount of SOL received by the fee payer in a transfer-shaped
    /// transaction, the funding amount the fresh-wallet matcher scores
    /// candidates against.
    fn transfer_amount_in(update: &RawChainUpdate) -> Option<Decimal> {
        update
            .sol_deltas
            .iter()
            .find(|(account, delta)| account == &update.fee_payer && *delta > Decimal::ZERO)
            .map(|(_, delta)| *delta)
    }

    fn swap_legs(
        update: &RawChainUpdate,
    ) -> (Option<String>, Option<String>, Option<Decimal>, Option<Decimal>) {
        let input = update.token_deltas.iter().find(|(_, _, amount)| *amount < Decimal::ZERO);
        let output = update.token_deltas.iter().find(|(_, _, amount)| *amount > Decimal::ZERO);
        (
            input.map(|(mint, _, _)| mint.clone()),
            output.map(|(mint, _, _)| mint.clone()),
            input.map(|(_, _, amount)| amount.abs()),
            output.map(|(_, _, amount)| amount.abs()),
        )
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn base_update() -> RawChainUpdate {
        RawChainUpdate {
            tx_hash: "tx1".to_string(),
            slot: 100,
            block_time: Some(Utc::now()),
            fee_payer: "wallet1".to_string(),
            succeeded: true,
            sol_deltas: Vec::new(),
            token_deltas: Vec::new(),
            program_ids: Vec::new(),
        }
    }

    #[test]
    fn failed_transaction_is_dropped() {
        let update = RawChainUpdate { succeeded: false, ..base_update() };
        assert!(Normalizer::new().normalize(update).is_none());
    }

    #[test]
    fn two_mint_opposite_sign_deltas_classify_as_swap() {
        let update = RawChainUpdate {
            token_deltas: vec![
                ("mintA".to_string(), "wallet1".to_string(), dec!(-5)),
                ("mintB".to_string(), "wallet1".to_string(), dec!(10)),
            ],
            program_ids: vec!["dexProgram".to_string()],
            ..base_update()
        };
        let event = Normalizer::new().normalize(update).unwrap();
        assert_eq!(event.kind, EventKind::Swap);
        assert_eq!(event.input_mint.as_deref(), Some("mintA"));
        assert_eq!(event.output_mint.as_deref(), Some("mintB"));
        assert_eq!(event.input_amount, Some(dec!(5)));
    }

    #[test]
    fn no_program_ids_without_swap_shape_is_a_transfer() {
        let update = RawChainUpdate {
            token_deltas: vec![("mintA".to_string(), "wallet1".to_string(), dec!(-5))],
            program_ids: Vec::new(),
            ..base_update()
        };
        let event = Normalizer::new().normalize(update).unwrap();
        assert_eq!(event.kind, EventKind::Transfer);
    }

    #[test]
    fn program_id_without_swap_shape_is_program_interaction() {
        let update = RawChainUpdate {
            token_deltas: Vec::new(),
            program_ids: vec!["someProgram".to_string()],
            ..base_update()
        };
        let event = Normalizer::new().normalize(update).unwrap();
        assert_eq!(event.kind, EventKind::ProgramInteraction);
    }

    #[test]
    fn same_mint_on_both_sides_is_not_a_swap() {
        let update = RawChainUpdate {
            token_deltas: vec![
                ("mintA".to_string(), "wallet1".to_string(), dec!(-5)),
                ("mintA".to_string(), "wallet2".to_string(), dec!(5)),
            ],
            program_ids: vec!["someProgram".to_string()],
            ..base_update()
        };
        let event = Normalizer::new().normalize(update).unwrap();
        assert_eq!(event.kind, EventKind::ProgramInteraction);
    }
}
