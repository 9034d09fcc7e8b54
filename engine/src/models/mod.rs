//! Engine data model

pub mod deployment;
pub mod event;
pub mod route;
pub mod rule;
pub mod service;
