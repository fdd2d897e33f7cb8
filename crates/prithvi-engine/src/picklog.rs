//! Append-only pick log with daily file rollover.
//!
//! One line per processed pick:
//! `YYYY-mm-dd HH:MM:SS.s  NET STA CHA LOC  snr  amp  per  modeFlag  pickId`.
//! With a prefix configured, the file is `prefix.YYYY-mm-dd` and rolls over
//! at UTC midnight. The writer is opened lazily on the first line of an
//! append session and flushed on close, shutdown, or prefix change.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};

use chrono::{DateTime, Utc};
use prithvi_models::Pick;
use tracing::{error, info};

#[derive(Default)]
pub struct PickLog {
    prefix: String,
    current_name: String,
    writer: Option<BufWriter<File>>,
}

impl PickLog {
    /// Set (or clear) the file name prefix. The open file, if any, is
    /// flushed and closed.
    pub fn set_prefix(&mut self, prefix: &str) {
        self.close();
        self.prefix = prefix.to_string();
        self.current_name.clear();
    }

    /// Append one pick line, reopening when the date-based name rolled over.
    pub fn log(&mut self, pick: &Pick, now: DateTime<Utc>) {
        if self.prefix.is_empty() {
            return;
        }

        let name = format!("{}.{}", self.prefix, now.format("%Y-%m-%d"));
        if name != self.current_name || self.writer.is_none() {
            self.close();
            match OpenOptions::new().create(true).append(true).open(&name) {
                Ok(f) => {
                    info!("logging picks to file {name}");
                    self.writer = Some(BufWriter::new(f));
                    self.current_name = name;
                }
                Err(err) => {
                    error!("failed to open pick log file {name}: {err}");
                    return;
                }
            }
        }

        let loc = if pick.loc.is_empty() { "__" } else { &pick.loc };
        let line = format!(
            "{} {:<2} {:<6} {:<3} {:<2} {:6.1} {:10.3} {:4.1} {} {}",
            pick.time.format("%Y-%m-%d %H:%M:%S%.3f"),
            pick.net,
            pick.sta,
            pick.cha,
            loc,
            pick.snr,
            pick.amplitude,
            pick.period,
            pick.mode.flag(),
            pick.id,
        );

        if let Some(w) = self.writer.as_mut() {
            if let Err(err) = writeln!(w, "{line}") {
                error!("pick log write failed: {err}");
            }
        }
    }

    /// Flush and close the current file.
    pub fn close(&mut self) {
        if let Some(mut w) = self.writer.take() {
            let _ = w.flush();
        }
    }
}

impl Drop for PickLog {
    fn drop(&mut self) {
        self.close();
    }
}
