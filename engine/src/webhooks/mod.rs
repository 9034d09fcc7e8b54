//! Provider webhooks

pub mod handler;
pub mod registry;
pub mod signature;
