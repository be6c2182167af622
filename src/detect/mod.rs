pub mod cex_registry;
pub mod correlation_engine;
pub mod fresh_wallet_matcher;
pub mod influencer_monitor;
pub mod withdrawal_detector;

pub use cex_registry::CexRegistry;
pub use correlation_engine::CorrelationEngine;
pub use fresh_wallet_matcher::FreshWalletMatcher;
pub use influencer_monitor::InfluencerMonitor;
pub use withdrawal_detector::WithdrawalDetector;
