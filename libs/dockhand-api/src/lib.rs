//! Dockhand API wire models

pub mod models;
