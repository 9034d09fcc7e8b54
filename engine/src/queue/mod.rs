//! Deployment queue

pub mod durable;
pub mod jobs;
