pub mod builder;
pub mod cli;
pub mod config;
pub mod counter;
pub mod embedding;
pub mod index;
mod metrics;
pub mod model;
pub mod searcher;
pub mod server;
pub mod summarize;
pub mod utils;

pub use config::Opts;
pub use searcher::Searcher;
