//! External interfaces: beacon TCP server, drive bus, trip log sink

pub mod beacon;
pub mod drive_bus;
pub mod trip_log;

pub use beacon::run_beacon_server;
pub use drive_bus::{DriveBusClient, DriveBusConfig, MotionCommand};
pub use trip_log::TripLog;
