pub mod agent;
pub mod config;
pub mod errors;
pub mod models;
pub mod routes;
pub mod service;
pub mod store;
