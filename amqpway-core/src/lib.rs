pub mod broker;
pub mod cli;
pub mod conf;
pub mod logging;
pub mod pool;
pub mod proxy;
pub mod server;
mod sync;
