//! Trip log sink - CSV rows relayed by the beacon
//!
//! One sink is open at a time. Files land in the configured directory as
//! gort_<date>_<time>_node<tag>.csv with a `time,data` header. Rows are
//! flushed as they arrive so a crash loses at most the row in flight.

use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

struct OpenSink {
    writer: BufWriter<File>,
    path: PathBuf,
    tag: i64,
}

pub struct TripLog {
    dir: PathBuf,
    sink: Option<OpenSink>,
}

impl TripLog {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { dir: dir.as_ref().to_path_buf(), sink: None }
    }

    /// Open a fresh sink for the given tag, closing any previous one.
    pub fn open(&mut self, tag: i64) -> std::io::Result<()> {
        if let Some(old) = self.sink.take() {
            debug!(path = %old.path.display(), "trip_log_closed");
        }

        fs::create_dir_all(&self.dir)?;

        let now = Utc::now();
        let filename = format!(
            "gort_{}_{}_node{}.csv",
            now.format("%Y%m%d"),
            now.format("%H%M%S"),
            tag
        );
        let path = self.dir.join(filename);

        // Append so a rotate landing on the same second keeps earlier rows;
        // the header is only written for a brand new file.
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let is_new = file.metadata().map(|m| m.len() == 0).unwrap_or(true);
        let mut writer = BufWriter::new(file);
        if is_new {
            writeln!(writer, "time,data")?;
            writer.flush()?;
        }

        info!(path = %path.display(), tag = tag, "trip_log_opened");
        self.sink = Some(OpenSink { writer, path, tag });
        Ok(())
    }

    /// Append one row to the open sink. Returns Ok(false) when no sink is
    /// open; the row is dropped, matching the protocol's fail-soft rule.
    pub fn append(&mut self, time: &str, data: &str) -> std::io::Result<bool> {
        let Some(sink) = self.sink.as_mut() else {
            debug!("trip_log_row_dropped: no open sink");
            return Ok(false);
        };
        writeln!(sink.writer, "{},{}", time, data)?;
        sink.writer.flush()?;
        Ok(true)
    }

    /// Close and reopen the sink for the same tag (new engagement).
    pub fn rotate(&mut self) -> std::io::Result<()> {
        let Some(sink) = self.sink.take() else {
            return Ok(());
        };
        let tag = sink.tag;
        drop(sink);
        self.open(tag)
    }

    pub fn close(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.writer.flush() {
                warn!(error = %e, "trip_log_flush_failed");
            }
            debug!(path = %sink.path.display(), "trip_log_closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.sink.as_ref().map(|s| s.path.as_path())
    }
}

impl Drop for TripLog {
    fn drop(&mut self) {
        self.close();
    }
}
