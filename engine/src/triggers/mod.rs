//! Event intake: normalization, rule matching and change detection

pub mod changes;
pub mod matcher;
pub mod normalize;
pub mod pattern;
