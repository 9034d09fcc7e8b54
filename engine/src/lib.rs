//! Dockhand Library
//!
//! Deployment orchestration engine: repository events in, routed and
//! health-checked containers out.

pub mod app;
pub mod cache;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod health;
pub mod http;
pub mod logs;
pub mod models;
pub mod queue;
pub mod retry;
pub mod routing;
pub mod server;
pub mod service;
pub mod storage;
pub mod store;
pub mod triggers;
pub mod utils;
pub mod webhooks;
pub mod workers;

#[cfg(test)]
mod testing;
