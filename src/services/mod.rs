//! Control logic: docking actor and command generator

pub mod commander;
pub mod docking;

pub use commander::Commander;
pub use docking::{DockRequest, DockingActor};
