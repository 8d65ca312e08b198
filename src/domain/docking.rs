//! Docking state machine
//!
//! The state machine is an explicit transition function over
//! `(state, classified line)`: it mutates the docking state and returns the
//! effects to perform (protocol replies, trip-log operations, cooperative
//! pauses). Keeping IO out of the transition makes the hysteresis and the
//! connect handshake testable without sockets or timers.
//!
//! Zone-crossing hysteresis: a connect handshake is trusted only after a
//! sustained run of boundary reports while the measured ground speed is
//! near zero. The pass counter forces a stop-and-retry once a beacon has
//! been crossed too many times without confirming.

use crate::domain::report::{Line, ZoneReport};
use serde::Serialize;
use std::time::Duration;

/// Sign applied to the commanded speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Direction::Forward => 1.0,
            Direction::Reverse => -1.0,
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }
}

/// Docking phase derived from `(connected, moving)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DockPhase {
    /// Not connected, not moving
    Searching,
    /// Not connected, moving toward a beacon
    Approaching,
    /// Connect handshake completed, held stopped at the beacon
    Docked,
}

/// Hysteresis thresholds and speed limits, loaded from config.
#[derive(Debug, Clone)]
pub struct DockingParams {
    /// Consecutive boundary reports required before a connect is trusted
    pub zero_crossing_threshold: u32,
    /// Saturating cap on forced-stop retries per approach
    pub pass_cap: u32,
    /// Measured speed below this magnitude counts as stopped
    pub speed_epsilon: f64,
    /// Approach speed applied when a new tag is first observed
    pub min_speed: f64,
    /// Travel speed restored on departure
    pub max_speed: f64,
    /// Cooperative pause after each report, letting the generator apply
    /// the new motion intent before the next line is read
    pub debounce: Duration,
}

impl Default for DockingParams {
    fn default() -> Self {
        Self {
            zero_crossing_threshold: 100,
            pass_cap: 6,
            speed_epsilon: 0.025,
            min_speed: 0.1,
            max_speed: 0.5,
            debounce: Duration::from_millis(20),
        }
    }
}

/// Side effect requested by a transition, executed by the docking actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Write a protocol reply back on the session
    Reply(String),
    /// Open a fresh trip log for the given tag, closing any open sink
    OpenLog { tag: i64 },
    /// Append one row to the open trip log, if any
    AppendLog { time: String, data: String },
    /// Close and reopen the trip log for a new engagement
    RotateLog,
    /// Cooperative yield before processing the next line
    Pause(Duration),
}

/// Shared docking state, owned by the single-writer actor.
#[derive(Debug, Clone)]
pub struct DockingState {
    /// Tag of the node under approach, cleared on DONE
    pub current_tag: Option<i64>,
    /// Last tag for which a connect handshake completed
    pub recent_tag: Option<i64>,
    /// True between a completed connect handshake and DONE
    pub connected: bool,
    /// Whether the generator should emit nonzero speed
    pub moving: bool,
    pub direction: Direction,
    /// Commanded speed magnitude, always within `[min_speed, max_speed]`
    pub speed: f64,
    /// Consecutive boundary observations since the last reset
    pub zero_crossing_count: u32,
    /// Forced-stop retries this approach, saturating at the cap
    pub pass_count: u32,
    params: DockingParams,
}

/// Immutable view published to the command generator and observers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DockSnapshot {
    pub current_tag: Option<i64>,
    pub connected: bool,
    pub moving: bool,
    pub direction: Direction,
    pub speed: f64,
    pub phase: DockPhase,
}

impl DockSnapshot {
    /// Signed speed the generator should command this tick.
    pub fn commanded_speed(&self) -> f64 {
        if self.moving {
            self.speed * self.direction.sign()
        } else {
            0.0
        }
    }
}

impl DockingState {
    pub fn new(params: DockingParams) -> Self {
        Self {
            current_tag: None,
            recent_tag: None,
            connected: false,
            moving: false,
            direction: Direction::Forward,
            speed: params.max_speed,
            zero_crossing_count: 0,
            pass_count: 0,
            params,
        }
    }

    pub fn phase(&self) -> DockPhase {
        if self.connected {
            DockPhase::Docked
        } else if self.moving {
            DockPhase::Approaching
        } else {
            DockPhase::Searching
        }
    }

    pub fn snapshot(&self) -> DockSnapshot {
        DockSnapshot {
            current_tag: self.current_tag,
            connected: self.connected,
            moving: self.moving,
            direction: self.direction,
            speed: self.speed,
            phase: self.phase(),
        }
    }

    /// Apply one classified line. `measured_speed` is the latest ground
    /// speed reported by the drive bus.
    pub fn apply(&mut self, line: &Line, measured_speed: f64) -> Vec<Effect> {
        match line {
            Line::Report(report) => self.apply_report(report, measured_speed),
            Line::Done => self.apply_done(),
            Line::File => vec![Effect::OpenLog { tag: self.current_tag.unwrap_or(0) }],
            Line::Log { time, data } => {
                vec![Effect::AppendLog { time: time.clone(), data: data.clone() }]
            }
            Line::Ignored => Vec::new(),
        }
    }

    fn apply_report(&mut self, report: &ZoneReport, measured_speed: f64) -> Vec<Effect> {
        let mut effects = Vec::new();

        // A new tag starts a fresh approach at the minimum speed.
        if self.current_tag != Some(report.tag) {
            self.current_tag = Some(report.tag);
            self.speed = self.params.min_speed;
        }
        self.direction = report.direction();

        if report.at_boundary() || self.pass_count >= self.params.pass_cap {
            self.zero_crossing_count += 1;
            self.moving = false;
            if self.pass_count < self.params.pass_cap {
                self.pass_count += 1;
            }
            effects.push(Effect::Pause(self.params.debounce));

            // Trust the handshake only after a sustained run of boundary
            // reports with the vehicle actually stopped.
            if !self.connected
                && self.zero_crossing_count >= self.params.zero_crossing_threshold
                && measured_speed.abs() < self.params.speed_epsilon
            {
                self.connected = true;
                self.recent_tag = self.current_tag;
                self.zero_crossing_count = 0;
                self.pass_count = 0;
                effects.push(Effect::Reply(format!("Connect {}", report.tag)));
            }
        } else {
            self.zero_crossing_count = 0;
            self.moving = true;
            effects.push(Effect::Pause(self.params.debounce));
        }

        effects
    }

    fn apply_done(&mut self) -> Vec<Effect> {
        self.connected = false;
        let tag = self.current_tag.take();
        let reply = format!("Disconnect {}", tag.unwrap_or(0));
        // Tag 0 is the "no beacon" placeholder; it gets no direction flip.
        if tag.is_some_and(|t| t != 0) {
            self.direction = self.direction.flipped();
        }
        self.moving = true;
        self.speed = self.params.max_speed;
        self.pass_count = 0;
        self.zero_crossing_count = 0;
        vec![Effect::RotateLog, Effect::Reply(reply)]
    }
}
