//! Calendar scraping: page rendering, per-month extraction, multi-month
//! aggregation, and the periodic scheduler that drives checks.

pub mod aggregator;
pub mod browser;
pub mod errors;
pub mod extractor;
pub mod renderer;
pub mod scheduler;
