pub mod config;
pub mod db;
pub mod history_client;
pub mod http;
pub mod idempotency;
pub mod jobs;
pub mod logging;
pub mod observability;
pub mod repositories;
pub mod wire;
