//! Infrastructure layer - clients, persistence, HTTP boundary

pub mod config;
pub mod http;
pub mod persistence;
pub mod poller;
pub mod service_clients;
pub mod state;
pub mod storage_client;
pub mod worker_client;
