//! Route registration

pub mod registrar;
pub mod store;
pub mod subdomain;
