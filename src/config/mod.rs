pub mod confidence;
pub mod settings;

pub use confidence::{ConfidencePolicy, ConfidenceProfile, WalletCategory};
pub use settings::AppConfig;
