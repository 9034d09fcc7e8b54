//! In-memory caches

pub mod deployment;
