pub mod args;
pub mod check;

pub use args::ConfigArgs;
