pub mod aggregate;
pub mod config;
pub mod error;
pub mod filter;
pub mod join;
pub mod loader;
pub mod metrics;
pub mod output;
pub mod pipeline;
pub mod site;
pub mod table;
