pub mod analytics;
pub mod config;
pub mod inference;
pub mod routes;
