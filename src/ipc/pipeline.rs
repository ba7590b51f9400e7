use anyhow::{Result, anyhow};
use log::{debug, error, info, trace, warn};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        mpsc::{Receiver, TryRecvError},
    },
    thread,
    time::{Duration, Instant},
};

use super::dispatch::dispatch_gesture;
use crate::actions::UinputSink;
use crate::config::Profile;
use crate::gestures::{GestureEngine, Swipe};
use crate::input::{self, SerialSource};
use crate::replay::CaptureWriter;

const HEARTBEAT_EVERY: u64 = 50;
const REOPEN_DELAY: Duration = Duration::from_secs(1);

pub enum PipelineMsg {
    Profile(Profile),
    Reset,
    Shutdown,
}

/// Counters published for `status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GestureStats {
    pub port: Option<String>,
    pub connected: bool,
    pub events: u64,
    /// Touches held in the current session.
    pub pending: usize,
    pub gestures: BTreeMap<String, u64>,
    pub last_gesture: Option<Swipe>,
}

/// Engine + sink for one sensor session. Lines go in strictly in order.
pub struct Pipeline {
    profile: Profile,
    engine: GestureEngine,
    sink: UinputSink,
    stats: Arc<Mutex<GestureStats>>,
    idle: u64,
}

impl Pipeline {
    pub fn new(profile: Profile, sink: UinputSink, stats: Arc<Mutex<GestureStats>>) -> Self {
        let engine = engine_for(&profile);
        Self {
            profile,
            engine,
            sink,
            stats,
            idle: 0,
        }
    }

    pub fn set_profile(&mut self, profile: Profile) {
        self.engine = engine_for(&profile);
        self.profile = profile;
        self.idle = 0;
    }

    pub fn reset(&mut self) {
        let history = self.engine.history();
        if !history.is_empty() {
            debug!("dropping {} pending touches", history.len());
        }
        self.engine.reset();
        self.stats.lock().unwrap_or_else(|p| p.into_inner()).pending = 0;
        self.idle = 0;
    }

    pub fn handle_line(&mut self, line: &str, at: Instant) -> Option<Swipe> {
        let ev = input::activation_from_line(line, at)?;
        let result = self.engine.process_event(ev.channel, ev.timestamp);

        let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
        stats.events += 1;
        stats.pending = self.engine.history().len();
        match result {
            Some(g) => {
                info!("SwipeGesture:{g}");
                *stats.gestures.entry(g.to_string()).or_default() += 1;
                stats.last_gesture = Some(g);
                drop(stats);
                self.idle = 0;
                if let Err(e) = dispatch_gesture(g, &self.profile, &mut self.sink) {
                    error!("dispatch failed: {e}");
                }
            }
            None => {
                self.idle += 1;
                if self.idle % HEARTBEAT_EVERY == 0 {
                    trace!("still listening ({} events without a gesture)", self.idle);
                }
            }
        }
        result
    }
}

fn engine_for(profile: &Profile) -> GestureEngine {
    GestureEngine::new(profile.rules.clone(), profile.session.timeout())
}

fn set_link(stats: &Arc<Mutex<GestureStats>>, port: Option<&str>, connected: bool) {
    let mut s = stats.lock().unwrap_or_else(|p| p.into_inner());
    s.port = port.map(str::to_string);
    s.connected = connected;
}

/// Gesture thread body: owns the serial port and the engine until shutdown.
pub fn run_pipeline(
    profile: Profile,
    stats: Arc<Mutex<GestureStats>>,
    rx: Receiver<PipelineMsg>,
) -> Result<()> {
    let sink = UinputSink::new_or_noop();
    let mut pipeline = Pipeline::new(profile, sink, stats.clone());
    let mut source: Option<SerialSource> = None;
    let mut warned_missing = false;

    loop {
        loop {
            match rx.try_recv() {
                Ok(PipelineMsg::Profile(p)) => {
                    let port_changed = p.serial.port != pipeline.profile.serial.port
                        || p.serial.baud != pipeline.profile.serial.baud;
                    pipeline.set_profile(p);
                    if port_changed {
                        source = None;
                    }
                    info!(
                        "pipeline: profile applied (session timeout {:?})",
                        pipeline.engine.timeout()
                    );
                }
                Ok(PipelineMsg::Reset) => {
                    pipeline.reset();
                    info!("pipeline: session reset");
                }
                Ok(PipelineMsg::Shutdown) | Err(TryRecvError::Disconnected) => return Ok(()),
                Err(TryRecvError::Empty) => break,
            }
        }

        let Some(src) = source.as_mut() else {
            let serial = &pipeline.profile.serial;
            match input::pick_port(serial.port.as_deref()) {
                Some(path) => match SerialSource::open(&path, serial.baud) {
                    Ok(s) => {
                        info!("pipeline: reading {} @ {}", s.name(), serial.baud);
                        set_link(&stats, Some(s.name()), true);
                        source = Some(s);
                        warned_missing = false;
                        continue;
                    }
                    Err(e) => {
                        if !warned_missing {
                            warn!("{e:#}");
                        }
                        set_link(&stats, Some(path.as_str()), false);
                    }
                },
                None => {
                    if !warned_missing {
                        warn!("no serial ports detected; pipeline idle");
                    }
                    set_link(&stats, None, false);
                }
            }
            warned_missing = true;
            thread::sleep(REOPEN_DELAY);
            continue;
        };

        match src.poll_lines() {
            Ok(lines) => {
                for line in lines {
                    pipeline.handle_line(&line, Instant::now());
                }
            }
            Err(e) => {
                error!("{e:#}; reopening");
                let name = src.name().to_string();
                set_link(&stats, Some(&name), false);
                source = None;
            }
        }
    }
}

pub struct ListenOptions {
    pub port: Option<String>,
    pub baud: Option<u32>,
    pub capture: Option<PathBuf>,
    pub actions: bool,
}

/// `swipectl listen`: classify in the foreground and print every gesture.
pub fn run_foreground(mut profile: Profile, opts: ListenOptions) -> Result<()> {
    if opts.port.is_some() {
        profile.serial.port = opts.port;
    }
    if let Some(b) = opts.baud {
        profile.serial.baud = b;
    }
    let path = input::pick_port(profile.serial.port.as_deref())
        .ok_or_else(|| anyhow!("no serial port found; pass --port"))?;
    let mut source = SerialSource::open(&path, profile.serial.baud)?;
    let mut capture = opts.capture.as_deref().map(CaptureWriter::create).transpose()?;

    let sink = if opts.actions {
        UinputSink::new_or_noop()
    } else {
        UinputSink::noop()
    };
    let stats = Arc::new(Mutex::new(GestureStats::default()));
    let mut pipeline = Pipeline::new(profile, sink, stats);
    info!("listening on {path}");

    loop {
        for line in source.poll_lines()? {
            let now = Instant::now();
            if let Some(w) = capture.as_mut() {
                w.record(&line, now)?;
            }
            if let Some(g) = pipeline.handle_line(&line, now) {
                println!("SwipeGesture:{g}");
            }
        }
    }
}
