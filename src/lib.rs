//! Scheduled network discovery: scan orchestration over pluggable engines,
//! address-keyed device aggregation, and accuracy ranking of data sources.

pub mod aggregator;
pub mod config;
pub mod container;
pub mod db;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod ranking;
pub mod scanner;
pub mod scheduler;
