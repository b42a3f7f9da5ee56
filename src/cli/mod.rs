pub mod app;
pub mod commands;
pub mod devices;
pub mod progress;
pub mod rank;
pub mod scan;
pub mod schedule;
pub mod serve;

pub use commands::{Cli, Commands};
