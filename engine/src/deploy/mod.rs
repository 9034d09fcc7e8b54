//! Deployment pipeline

pub mod docker;
pub mod fsm;
pub mod git;
pub mod processor;
pub mod quota;
pub mod records;
pub mod runtime;
