//! Operations exposed to the HTTP surface and the webhook handler

pub mod deployments;
