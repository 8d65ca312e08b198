//! Beacon protocol line classification
//!
//! One decoded line maps to exactly one `Line` variant. Classification is
//! pure; all mutation happens in the docking actor that consumes it.

use crate::domain::docking::Direction;

/// A single zone report from the proximity companion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneReport {
    /// Zone token. `'+'` characters bias direction, a trailing `'0'`
    /// marks the beacon's reference boundary.
    pub zone: String,
    /// Distance/signal token, carried through unparsed.
    pub proximity: String,
    /// Id of the beacon node under approach.
    pub tag: i64,
}

impl ZoneReport {
    /// True when the zone token signals the beacon boundary.
    pub fn at_boundary(&self) -> bool {
        self.zone.ends_with('0')
    }

    /// Direction bias encoded in the zone token: any `'+'` means reverse.
    pub fn direction(&self) -> Direction {
        if self.zone.contains('+') {
            Direction::Reverse
        } else {
            Direction::Forward
        }
    }
}

/// Classification result for one protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// `Z <zone> <proximity> <tag>` zone report
    Report(ZoneReport),
    /// `DONE` - ends the current docking engagement
    Done,
    /// `FILE` - opens a new trip log for the current tag
    File,
    /// `<time>;<field>;...` - generic log row, payload rejoined with `;`
    Log { time: String, data: String },
    /// Malformed `Z` line: dropped with no state change and no reply
    Ignored,
}

/// Classify one decoded protocol line.
pub fn classify(line: &str) -> Line {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix('Z') {
        let tokens: Vec<&str> = rest.split_whitespace().collect();
        if tokens.len() != 3 {
            return Line::Ignored;
        }
        let Ok(tag) = tokens[2].parse::<i64>() else {
            return Line::Ignored;
        };
        return Line::Report(ZoneReport {
            zone: tokens[0].to_string(),
            proximity: tokens[1].to_string(),
            tag,
        });
    }

    if line.starts_with("DONE") {
        return Line::Done;
    }

    if line.starts_with("FILE") {
        return Line::File;
    }

    // Everything else is a log row: first `;`-separated field is the
    // timestamp, the remainder keeps its internal separators.
    let mut parts = line.splitn(2, ';');
    let time = parts.next().unwrap_or("").to_string();
    let data = parts.next().unwrap_or("").to_string();
    Line::Log { time, data }
}
