pub mod config;
pub mod middleware;
pub mod notifier;
pub mod routes;
