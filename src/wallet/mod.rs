pub mod key_vault;
pub mod sub_wallet_pool;

pub use key_vault::KeyVault;
pub use sub_wallet_pool::SubWalletPool;
