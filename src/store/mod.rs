pub mod change;
pub mod disk;
pub mod gateway;
pub mod models;

pub use change::{apply_cache_sync, ReconcileTrigger, StrategyChange};
pub use gateway::StoreGateway;
