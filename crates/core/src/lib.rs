pub mod account;
pub mod config;
pub mod config_loader;
pub mod config_watcher;
pub mod error;
pub mod market;
pub mod orders;
pub mod precision;
pub mod records;
#[cfg(any(test, feature = "test-util"))]
pub mod test_util;
pub mod traits;

pub use account::{Balance, MarginMode, PendingOrder, Position, PositionSide, TriggerKind};
pub use config::{
    AdvisoryConfig, AppConfig, DatabaseConfig, ExecutionMode, IndicatorConfig, ProviderConfig,
    ServerConfig, TradingConfig, VenueConfig,
};
pub use config_loader::ConfigLoader;
pub use config_watcher::ConfigWatcher;
pub use error::{VenueError, VenueResult};
pub use market::{
    BookLevel, BreadthAssessment, FundingRate, IndicatorSet, MarketBreadth, OrderBook,
    SymbolRules, Ticker,
};
pub use orders::{MarketOrderRequest, OrderAck, OrderSide, TriggerOrderRequest};
pub use precision::truncate_to_step;
pub use records::{EquitySnapshot, MarketSnapshot, MemoryNote};
pub use traits::{IndicatorSource, MemoryStore, VenueClient};
