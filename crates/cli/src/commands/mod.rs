//! Subcommand implementations

pub mod attributes;
pub mod recommend;
pub mod status;
