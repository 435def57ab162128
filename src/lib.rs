pub mod analysis;
pub mod catalog;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod forecast;
pub mod likelihood;
pub mod logging;
pub mod random;
pub mod rate_cache;
pub mod ratio_test;
pub mod simulation;
pub mod summary;
pub mod types;
