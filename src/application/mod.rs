//! Application layer - services and ports

pub mod ports;
pub mod services;
