use anyhow::{Result, anyhow};
use log::{info, warn};

pub struct UinputSink {
    enabled: bool,
    #[allow(dead_code)]
    linux: Option<Box<LinuxUinput>>,
}

impl UinputSink {
    pub fn new() -> Result<Self> {
        #[cfg(target_os = "linux")]
        {
            let dev = LinuxUinput::create()?;
            return Ok(Self {
                enabled: true,
                linux: Some(Box::new(dev)),
            });
        }
        #[allow(unreachable_code)]
        {
            warn!("uinput not available; running in NO-OP mode");
            Ok(Self::noop())
        }
    }

    pub fn noop() -> Self {
        Self {
            enabled: true,
            linux: None,
        }
    }

    /// Falls back to NO-OP when the virtual device cannot be created.
    pub fn new_or_noop() -> Self {
        Self::new().unwrap_or_else(|e| {
            warn!("uinput unavailable ({e}); gestures will only be logged");
            Self::noop()
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
    pub fn set_enabled(&mut self, en: bool) {
        self.enabled = en;
    }

    pub fn scroll(&mut self, horizontal: bool, steps: i32) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            dev.scroll(horizontal, steps)?;
        }
        Ok(())
    }

    pub fn click_mouse(&mut self, which: &str) -> Result<()> {
        let which = which.to_ascii_lowercase();
        if !matches!(which.as_str(), "left" | "right" | "middle") {
            return Err(anyhow!("unknown mouse button: {which}"));
        }
        if !self.enabled {
            return Ok(());
        }
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            dev.click(&which)?;
        }
        Ok(())
    }

    /// Send a chord like "ALT+LEFT" or single "PAGEDOWN"
    pub fn key_chord(&mut self, chord: &str) -> Result<()> {
        let keys = parse_chord(chord)?;
        if !self.enabled {
            return Ok(());
        }
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            let keys: Vec<_> = keys.iter().map(|k| k.to_uinput()).collect();
            // press in order
            for k in &keys {
                dev.key_send(*k, 1)?;
            }
            dev.sync()?;
            // release in reverse
            for k in keys.iter().rev() {
                dev.key_send(*k, 0)?;
            }
            dev.sync()?;
        }
        #[cfg(not(target_os = "linux"))]
        let _ = keys;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChordKey {
    Ctrl,
    Alt,
    Shift,
    Super,
    Tab,
    Minus,
    Equal,
    Left,
    Right,
    Up,
    Down,
    PageUp,
    PageDown,
    Home,
    End,
}

pub fn parse_chord(chord: &str) -> Result<Vec<ChordKey>> {
    chord
        .split('+')
        .map(|s| s.trim().to_ascii_uppercase())
        .map(|tok| {
            let k = match tok.as_str() {
                "CTRL" | "CONTROL" => ChordKey::Ctrl,
                "ALT" => ChordKey::Alt,
                "SHIFT" => ChordKey::Shift,
                "SUPER" | "META" | "WIN" => ChordKey::Super,
                "TAB" => ChordKey::Tab,
                "MINUS" | "-" => ChordKey::Minus,
                "EQUAL" | "=" => ChordKey::Equal,
                "LEFT" => ChordKey::Left,
                "RIGHT" => ChordKey::Right,
                "UP" => ChordKey::Up,
                "DOWN" => ChordKey::Down,
                "PAGEUP" | "PGUP" => ChordKey::PageUp,
                "PAGEDOWN" | "PGDN" => ChordKey::PageDown,
                "HOME" => ChordKey::Home,
                "END" => ChordKey::End,
                other => return Err(anyhow!("unsupported key token: {other}")),
            };
            Ok(k)
        })
        .collect()
}

#[cfg(target_os = "linux")]
impl ChordKey {
    fn to_uinput(self) -> uinput::event::keyboard::Key {
        use uinput::event::keyboard::Key as K;
        match self {
            ChordKey::Ctrl => K::LeftControl,
            ChordKey::Alt => K::LeftAlt,
            ChordKey::Shift => K::LeftShift,
            ChordKey::Super => K::LeftMeta,
            ChordKey::Tab => K::Tab,
            ChordKey::Minus => K::Minus,
            ChordKey::Equal => K::Equal,
            ChordKey::Left => K::Left,
            ChordKey::Right => K::Right,
            ChordKey::Up => K::Up,
            ChordKey::Down => K::Down,
            ChordKey::PageUp => K::PageUp,
            ChordKey::PageDown => K::PageDown,
            ChordKey::Home => K::Home,
            ChordKey::End => K::End,
        }
    }
}

#[cfg(target_os = "linux")]
struct LinuxUinput {
    dev: uinput::device::Device,
}

#[cfg(target_os = "linux")]
impl LinuxUinput {
    fn create() -> Result<Self> {
        use uinput::event::{controller::Mouse, keyboard::Key, relative};

        let mut builder = uinput::default()?
            .name("Swipectl Virtual Input")?
            // wheel
            .event(relative::Wheel::Vertical)?
            .event(relative::Wheel::Horizontal)?
            // mouse buttons
            .event(Mouse::Left)?
            .event(Mouse::Right)?
            .event(Mouse::Middle)?;
        for k in [
            Key::LeftControl,
            Key::LeftAlt,
            Key::LeftShift,
            Key::LeftMeta,
            Key::Tab,
            Key::Minus,
            Key::Equal,
            Key::Left,
            Key::Right,
            Key::Up,
            Key::Down,
            Key::PageUp,
            Key::PageDown,
            Key::Home,
            Key::End,
        ] {
            builder = builder.event(k)?;
        }
        let dev = builder.create()?;

        info!("uinput: created virtual device");
        Ok(Self { dev })
    }

    fn sync(&mut self) -> Result<()> {
        self.dev.synchronize()?;
        Ok(())
    }

    fn key_send(&mut self, key: uinput::event::keyboard::Key, val: i32) -> Result<()> {
        self.dev.send(key, val)?;
        Ok(())
    }

    fn click(&mut self, which: &str) -> Result<()> {
        use uinput::event::controller::Mouse;
        let btn = match which {
            "right" => Mouse::Right,
            "middle" => Mouse::Middle,
            _ => Mouse::Left,
        };
        self.dev.send(btn, 1)?;
        self.sync()?;
        self.dev.send(btn, 0)?;
        self.sync()
    }

    fn scroll(&mut self, horizontal: bool, steps: i32) -> Result<()> {
        use uinput::event::relative::Wheel;
        let axis = if horizontal {
            Wheel::Horizontal
        } else {
            Wheel::Vertical
        };
        self.dev.send(axis, steps)?;
        self.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chords() {
        assert_eq!(
            parse_chord("alt+Left").unwrap(),
            vec![ChordKey::Alt, ChordKey::Left]
        );
        assert_eq!(parse_chord("PGDN").unwrap(), vec![ChordKey::PageDown]);
        assert!(parse_chord("CTRL+F13").is_err());
    }

    #[test]
    fn noop_sink_accepts_valid_actions() {
        let mut sink = UinputSink::noop();
        sink.key_chord("CTRL+EQUAL").unwrap();
        sink.click_mouse("Right").unwrap();
        sink.scroll(false, -3).unwrap();
        assert!(sink.click_mouse("fourth").is_err());
        sink.set_enabled(false);
        assert!(!sink.is_enabled());
    }
}
