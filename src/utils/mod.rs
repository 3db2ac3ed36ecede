//! Small shared helpers

pub mod jitter;
