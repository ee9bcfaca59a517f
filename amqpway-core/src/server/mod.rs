pub mod setup;

pub use setup::{build_gateway_server, run};
