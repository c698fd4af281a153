//! CLI command implementations.

pub mod changelog;
pub mod check;
pub mod status;
pub mod sync;
