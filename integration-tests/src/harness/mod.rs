pub mod server;
pub mod tracing;

pub use server::{TestServer, captured_events};
pub use tracing::{CapturedEvent, init_test_tracing};
