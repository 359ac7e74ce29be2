pub mod ledger;
pub mod lifecycle;
pub mod ownership;
pub mod sweeper;
pub mod token;

pub use ledger::AnchorClient;
pub use lifecycle::LifecycleService;
pub use ownership::SignerRecovery;
pub use sweeper::Sweeper;
pub use token::TokenService;
