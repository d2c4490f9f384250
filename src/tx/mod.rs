//! Transaction assembly, pricing and submission

mod builder;
mod gas;
mod nonce;
mod sender;

pub use builder::{TransactionBuilder, TransactionEnvelope, VaultContext};
pub use gas::{FeeEstimator, FeeQuote, PriorityTier};
pub use nonce::{read_exec_nonce, NonceCoordinator, NoncePolicy};
pub use sender::Broadcaster;
