use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::instrument;

use crate::core::types::SignalSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceProfile {
    Conservative,
    Moderate,
    Aggressive,
}

impl ConfidenceProfile {
    /// Base confidence threshold for a signal type under this profile.
    fn base_threshold(&self, signal_type: SignalSource) -> f64 {
        match (self, signal_type) {
            (ConfidenceProfile::Conservative, SignalSource::Cabal) => 0.80,
            (ConfidenceProfile::Conservative, SignalSource::Influencer) => 0.85,
            (ConfidenceProfile::Conservative, SignalSource::FreshWallet) => 0.85,
            (ConfidenceProfile::Conservative, SignalSource::Perps) => 0.85,
            (ConfidenceProfile::Conservative, SignalSource::Hybrid) => 0.85,
            (ConfidenceProfile::Conservative, SignalSource::Manual) => 0.0,

            (ConfidenceProfile::Moderate, SignalSource::Cabal) => 0.70,
            (ConfidenceProfile::Moderate, SignalSource::Influencer) => 0.75,
            (ConfidenceProfile::Moderate, SignalSource::FreshWallet) => 0.75,
            (ConfidenceProfile::Moderate, SignalSource::Perps) => 0.75,
            (ConfidenceProfile::Moderate, SignalSource::Hybrid) => 0.75,
            (ConfidenceProfile::Moderate, SignalSource::Manual) => 0.0,

            (ConfidenceProfile::Aggressive, SignalSource::Cabal) => 0.60,
            (ConfidenceProfile::Aggressive, SignalSource::Influencer) => 0.65,
            (ConfidenceProfile::Aggressive, SignalSource::FreshWallet) => 0.65,
            (ConfidenceProfile::Aggressive, SignalSource::Perps) => 0.65,
            (ConfidenceProfile::Aggressive, SignalSource::Hybrid) => 0.65,
            (ConfidenceProfile::Aggressive, SignalSource::Manual) => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletCategory {
    Memecoin,
    Ecosystem,
}

impl WalletCategory {
    fn multiplier(&self) -> f64 {
        match self {
            WalletCategory::Memecoin => 1.0,
            WalletCategory::Ecosystem => 0.90,
        }
    }
}

/// Pure gating function plus the hot-swappable profile cell. Mirrors the
/// teacher's `ConfigManager` hot-reload design: readers take a snapshot of
/// the profile enum (a `Copy` value) rather than holding the lock across
/// their decision.
pub struct ConfidencePolicy {
    profile: Arc<RwLock<ConfidenceProfile>>,
}

impl ConfidencePolicy {
    pub fn new(profile: ConfidenceProfile) -> Self {
        Self {
            profile: Arc::new(RwLock::new(profile)),
        }
    }

    #[instrument(skip(self))]
    pub async fn set_profile(&self, profile: ConfidenceProfile) {
        let mut guard = self.profile.write().await;
        *guard = profile;
    }

    pub async fn snapshot(&self) -> ConfidenceProfile {
        *self.profile.read().await
    }

    pub async fn should_execute(
        &self,
        signal_type: SignalSource,
        confidence: f64,
        wallet_category: Option<WalletCategory>,
    ) -> bool {
        let profile = self.snapshot().await;
        Self::should_execute_with_profile(profile, signal_type, confidence, wallet_category)
    }

    /// Pure core of the decision, exposed separately so it can be tested
    /// without an async context or a running policy instance.
    pub fn should_execute_with_profile(
        profile: ConfidenceProfile,
        signal_type: SignalSource,
        confidence: f64,
        wallet_category: Option<WalletCategory>,
    ) -> bool {
        let base = profile.base_threshold(signal_type);
        let multiplier = wallet_category
            .map(|c| c.multiplier())
            .unwrap_or(1.0)
            .clamp(0.5, 1.0);
        confidence >= base * multiplier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_scales_down_for_ecosystem_wallets() {
        let conservative_memecoin = ConfidencePolicy::should_execute_with_profile(
            ConfidenceProfile::Conservative,
            SignalSource::Cabal,
            0.80,
            Some(WalletCategory::Memecoin),
        );
        let conservative_ecosystem = ConfidencePolicy::should_execute_with_profile(
            ConfidenceProfile::Conservative,
            SignalSource::Cabal,
            0.72,
            Some(WalletCategory::Ecosystem),
        );
        assert!(conservative_memecoin);
        assert!(conservative_ecosystem);
    }

    #[test]
    fn should_execute_is_non_decreasing_in_confidence() {
        let low = ConfidencePolicy::should_execute_with_profile(
            ConfidenceProfile::Moderate,
            SignalSource::FreshWallet,
            0.5,
            None,
        );
        let high = ConfidencePolicy::should_execute_with_profile(
            ConfidenceProfile::Moderate,
            SignalSource::FreshWallet,
            0.95,
            None,
        );
        assert!(!low);
        assert!(high);
    }

    #[tokio::test]
    async fn profile_hot_swap_changes_subsequent_decisions() {
        let policy = ConfidencePolicy::new(ConfidenceProfile::Conservative);
        assert!(!policy.should_execute(SignalSource::Cabal, 0.72, None).await);
        policy.set_profile(ConfidenceProfile::Aggressive).await;
        assert!(policy.should_execute(SignalSource::Cabal, 0.72, None).await);
    }
}
