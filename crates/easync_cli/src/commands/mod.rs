//! CLI command implementations.

pub mod codepages;
pub mod dump;
pub mod encode;
pub mod state;
