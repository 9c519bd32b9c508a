//! Watch a third-party booking calendar and notify when a wanted day opens up.

pub mod app;
pub mod calendar;
pub mod cli;
pub mod config;
pub mod decision;
pub mod fmt;
pub mod logging;
pub mod monitor;
pub mod notify;
pub mod retry;
pub mod scraper;
pub mod signals;
pub mod store;
pub mod utils;
