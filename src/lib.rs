pub mod config;
pub mod error;
pub mod filters;
pub mod graph;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod store;
