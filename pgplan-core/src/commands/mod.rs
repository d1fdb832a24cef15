//! Command implementations: dump, plan, apply.

pub mod apply;
pub mod dump;
pub mod plan;
