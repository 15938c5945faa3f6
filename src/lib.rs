pub mod cache;
pub mod config;
pub mod embedding;
pub mod errors;
pub mod logging;
pub mod models;
pub mod rerank;
pub mod routing;
pub mod search;
