pub mod api;
pub mod config;
pub mod errors;
pub mod exchanges;
pub mod indicators;
pub mod market;
pub mod models;
pub mod store;
