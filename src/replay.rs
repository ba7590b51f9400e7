//! Capture files: `<millis> <raw line>` per received serial line.

use anyhow::{Context, Result};
use log::warn;
use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
    time::{Duration, Instant},
};

use crate::gestures::{GestureEngine, Swipe};
use crate::input;

pub struct CaptureWriter {
    out: BufWriter<File>,
    started: Instant,
}

impl CaptureWriter {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Self {
            out: BufWriter::new(file),
            started: Instant::now(),
        })
    }

    pub fn record(&mut self, line: &str, at: Instant) -> Result<()> {
        let ms = at.saturating_duration_since(self.started).as_millis();
        writeln!(self.out, "{ms} {line}")?;
        self.out.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayHit {
    pub at_ms: u64,
    pub swipe: Swipe,
}

/// Parses one capture line into its offset and raw payload.
fn split_capture_line(line: &str) -> Option<(u64, &str)> {
    let (ms, rest) = line.trim_end().split_once(' ')?;
    Some((ms.parse().ok()?, rest))
}

pub fn replay<R: BufRead>(reader: R, engine: &mut GestureEngine) -> Result<Vec<ReplayHit>> {
    let t0 = Instant::now();
    let mut hits = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((at_ms, raw)) = split_capture_line(&line) else {
            warn!("capture line {}: missing timestamp", n + 1);
            continue;
        };
        let at = t0 + Duration::from_millis(at_ms);
        let Some(ev) = input::activation_from_line(raw, at) else {
            continue;
        };
        if let Some(swipe) = engine.process_event(ev.channel, ev.timestamp) {
            hits.push(ReplayHit { at_ms, swipe });
        }
    }
    Ok(hits)
}

pub fn replay_file(path: &Path, engine: &mut GestureEngine) -> Result<Vec<ReplayHit>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    replay(BufReader::new(file), engine)
}
