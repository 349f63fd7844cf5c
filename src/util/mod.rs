//! Shared helpers: duration parsing/formatting and identifier generation

pub mod ids;
pub mod time;
