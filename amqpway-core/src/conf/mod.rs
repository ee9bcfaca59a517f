mod error;
mod loader;
mod overrides;
pub mod types;
mod validation;


pub use error::ConfigError;
pub use loader::{load_config, parse_config};
pub use overrides::ConfigOverrides;
pub use types::{AmqpwayConfig, BrokerConfig, PoolConfig, ServerConfig};
pub use validation::validate_config;
