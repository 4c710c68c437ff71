pub mod auth;
pub mod configuration;
pub mod email_client;
pub mod engine;
pub mod error;
pub mod middleware;
pub mod rate_gate;
pub mod routes;
pub mod startup;
pub mod store;
pub mod telemetry;
pub mod validators;
