//! Container health reconciliation

pub mod monitor;
