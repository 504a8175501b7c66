pub mod app;
pub mod auth_middleware;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod error;
pub mod repositories;
pub mod routes;
pub mod state;
pub mod telemetry;
