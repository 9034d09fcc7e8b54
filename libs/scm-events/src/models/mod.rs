//! Webhook payload models

pub mod github;
pub mod gitlab;
