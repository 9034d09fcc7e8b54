//! Source-control webhook payloads

pub mod models;
