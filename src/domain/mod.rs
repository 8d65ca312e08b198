//! Core docking types and state transitions

pub mod docking;
pub mod report;
