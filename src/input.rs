//! Serial port discovery & activation stream (serialport 4.x)

use anyhow::{Context, Result};
use log::{debug, warn};
use serialport::{SerialPort, SerialPortType};
use std::{
    io::{self, Read},
    time::{Duration, Instant},
};
use thiserror::Error;

/// Channel identifier as printed by the sensor firmware.
pub type Channel = u8;

pub const CHANNEL_MARKER: &str = "TouchChannel:";
pub const DEFAULT_BAUD: u32 = 9600;

const READ_TIMEOUT: Duration = Duration::from_millis(100);
const PENDING_MAX: usize = 4 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationEvent {
    pub channel: Channel,
    pub timestamp: Instant,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LineError {
    #[error("no 'TouchChannel:' field in line")]
    MissingMarker,
    #[error("invalid channel value '{0}'")]
    BadChannel(String),
}

/// Extract the channel from a firmware line such as `Event: TouchChannel:3`.
/// `Ok(None)` means "no touch" and must not reach the engine.
pub fn parse_channel(line: &str) -> Result<Option<Channel>, LineError> {
    let at = line.find(CHANNEL_MARKER).ok_or(LineError::MissingMarker)?;
    let rest = line[at + CHANNEL_MARKER.len()..].trim_start();
    let digits: &str = match rest.find(|c: char| !c.is_ascii_digit()) {
        Some(end) => &rest[..end],
        None => rest,
    };
    if digits.is_empty() {
        return Err(LineError::BadChannel(rest.chars().take(8).collect()));
    }
    let ch: Channel = digits
        .parse()
        .map_err(|_| LineError::BadChannel(digits.to_string()))?;
    Ok((ch != 0).then_some(ch))
}

/// Splits a raw byte stream into text lines.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '\n']);
            if !line.is_empty() {
                out.push(line.to_string());
            }
        }
        // garbage without newlines; keep the tail only
        if self.pending.len() > PENDING_MAX {
            let cut = self.pending.len() - PENDING_MAX;
            self.pending.drain(..cut);
        }
        out
    }
}

/// Turns raw lines into activations, dropping "no touch" and malformed ones.
pub fn activation_from_line(line: &str, timestamp: Instant) -> Option<ActivationEvent> {
    match parse_channel(line) {
        Ok(Some(channel)) => Some(ActivationEvent { channel, timestamp }),
        Ok(None) => None,
        Err(e) => {
            debug!("skipping line {line:?}: {e}");
            None
        }
    }
}

pub struct SerialSource {
    name: String,
    port: Box<dyn SerialPort>,
    lines: LineAssembler,
    buf: [u8; 256],
}

impl SerialSource {
    pub fn open(path: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(path, baud)
            .timeout(READ_TIMEOUT)
            .open()
            .with_context(|| format!("failed to open serial port {path} @ {baud}"))?;
        Ok(Self {
            name: path.to_string(),
            port,
            lines: LineAssembler::new(),
            buf: [0; 256],
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// One read with the port timeout. Returns the complete lines received,
    /// possibly none.
    pub fn poll_lines(&mut self) -> Result<Vec<String>> {
        match self.port.read(&mut self.buf) {
            Ok(0) => Ok(Vec::new()),
            Ok(n) => {
                let lines = self.lines.feed(&self.buf[..n]);
                for l in &lines {
                    debug!("{}: {l}", self.name);
                }
                Ok(lines)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| format!("read from {} failed", self.name)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortInfo {
    pub path: String,
    pub description: String,
}

pub fn discover_ports() -> Vec<PortInfo> {
    let ports = match serialport::available_ports() {
        Ok(p) => p,
        Err(e) => {
            warn!("serial port enumeration failed: {e}");
            return Vec::new();
        }
    };
    ports
        .into_iter()
        .map(|p| {
            let description = match p.port_type {
                SerialPortType::UsbPort(usb) => format!(
                    "usb {:04x}:{:04x} {}",
                    usb.vid,
                    usb.pid,
                    usb.product.unwrap_or_default()
                )
                .trim_end()
                .to_string(),
                SerialPortType::PciPort => "pci".to_string(),
                SerialPortType::BluetoothPort => "bluetooth".to_string(),
                SerialPortType::Unknown => "unknown".to_string(),
            };
            PortInfo {
                path: p.port_name,
                description,
            }
        })
        .collect()
}

/// Configured port, or the first USB one, or the first one at all.
pub fn pick_port(configured: Option<&str>) -> Option<String> {
    if let Some(p) = configured {
        return Some(p.to_string());
    }
    let ports = discover_ports();
    ports
        .iter()
        .find(|p| p.description.starts_with("usb"))
        .or_else(|| ports.first())
        .map(|p| p.path.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_firmware_lines() {
        assert_eq!(parse_channel("TouchChannel:3"), Ok(Some(3)));
        assert_eq!(parse_channel("Event 12 TouchChannel:6 prox"), Ok(Some(6)));
        assert_eq!(parse_channel("TouchChannel: 7"), Ok(Some(7)));
        assert_eq!(parse_channel("TouchChannel:12"), Ok(Some(12)));
    }

    #[test]
    fn zero_channel_is_filtered() {
        assert_eq!(parse_channel("TouchChannel:0"), Ok(None));
        let now = Instant::now();
        assert_eq!(activation_from_line("TouchChannel:0", now), None);
        assert_eq!(
            activation_from_line("TouchChannel:5", now),
            Some(ActivationEvent {
                channel: 5,
                timestamp: now
            })
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(parse_channel("hello"), Err(LineError::MissingMarker));
        assert!(matches!(
            parse_channel("TouchChannel:x"),
            Err(LineError::BadChannel(_))
        ));
        assert!(matches!(
            parse_channel("TouchChannel:999"),
            Err(LineError::BadChannel(_))
        ));
        assert_eq!(activation_from_line("TouchChannel:", Instant::now()), None);
    }

    #[test]
    fn assembles_lines_across_reads() {
        let mut asm = LineAssembler::new();
        assert!(asm.feed(b"TouchCha").is_empty());
        assert_eq!(asm.feed(b"nnel:3\r\nTouch"), vec!["TouchChannel:3"]);
        assert_eq!(
            asm.feed(b"Channel:4\n\r\nTouchChannel:6\n"),
            vec!["TouchChannel:4", "TouchChannel:6"]
        );
    }

    #[test]
    fn assembler_caps_pending_bytes() {
        let mut asm = LineAssembler::new();
        let junk = vec![b'x'; PENDING_MAX * 2];
        assert!(asm.feed(&junk).is_empty());
        assert_eq!(asm.pending.len(), PENDING_MAX);
        let lines = asm.feed(b"\nTouchChannel:2\n");
        assert_eq!(lines.last().map(String::as_str), Some("TouchChannel:2"));
    }

    #[test]
    fn configured_port_wins() {
        assert_eq!(pick_port(Some("/dev/ttyACM3")).as_deref(), Some("/dev/ttyACM3"));
    }
}
