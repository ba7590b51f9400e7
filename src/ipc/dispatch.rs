use crate::actions::UinputSink;
use crate::config::Profile;
use crate::gestures::Swipe;
use anyhow::{Result, anyhow};
use log::{debug, info, warn};
use std::{process::Command, thread};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Mouse(String),
    Scroll { horizontal: bool, steps: i32 },
    Key(String),
    Toggle,
    Cmd(String),
}

impl Action {
    pub fn parse(action: &str) -> Result<Self> {
        let action = action.trim();
        if action == "toggle" {
            return Ok(Action::Toggle);
        }
        if let Some(rest) = action.strip_prefix("mouse:") {
            return Ok(Action::Mouse(rest.trim().to_string()));
        }
        if let Some(rest) = action.strip_prefix("scroll:") {
            let mut parts = rest.split('@');
            let axis = parts.next().map(str::trim).unwrap_or("vertical");
            let steps_str = parts.next().map(str::trim).unwrap_or("+1");
            let steps: i32 = steps_str
                .parse()
                .map_err(|_| anyhow!("bad scroll steps '{steps_str}'"))?;
            let horizontal = if axis.eq_ignore_ascii_case("horizontal") {
                true
            } else if axis.eq_ignore_ascii_case("vertical") {
                false
            } else {
                return Err(anyhow!("unknown scroll axis '{axis}'"));
            };
            return Ok(Action::Scroll { horizontal, steps });
        }
        if let Some(rest) = action.strip_prefix("key:") {
            return Ok(Action::Key(rest.trim().to_string()));
        }
        if let Some(rest) = action.strip_prefix("cmd:") {
            return Ok(Action::Cmd(rest.trim().to_string()));
        }
        Err(anyhow!("unknown action '{action}'"))
    }
}

pub fn dispatch_gesture(g: Swipe, profile: &Profile, sink: &mut UinputSink) -> Result<()> {
    let Some(binding) = profile.binding(g) else {
        debug!("no binding for {}", g.binding_key());
        return Ok(());
    };
    let action = Action::parse(binding)
        .map_err(|e| anyhow!("{} -> '{binding}': {e}", g.binding_key()))?;

    match action {
        Action::Toggle => {
            let en = !sink.is_enabled();
            sink.set_enabled(en);
            info!("actions {}", if en { "enabled" } else { "disabled" });
        }
        Action::Mouse(btn) => sink.click_mouse(&btn)?,
        Action::Scroll { horizontal, steps } => sink.scroll(horizontal, steps)?,
        Action::Key(chord) => sink.key_chord(&chord)?,
        Action::Cmd(cmd) => {
            if !profile.meta.allow_commands {
                return Err(anyhow!("cmd: bindings are disabled by allow_commands=false"));
            }
            if sink.is_enabled() {
                let mut child = Command::new("sh").arg("-c").arg(&cmd).spawn()?;
                debug!("spawned '{cmd}' (pid={})", child.id());
                // reap off-thread so the gesture loop never blocks on the command
                thread::spawn(move || match child.wait() {
                    Ok(status) if !status.success() => warn!("'{cmd}' exited with {status}"),
                    Ok(_) => {}
                    Err(e) => warn!("waiting for '{cmd}' failed: {e}"),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_actions() {
        assert_eq!(Action::parse("toggle").unwrap(), Action::Toggle);
        assert_eq!(
            Action::parse("scroll:vertical@-3").unwrap(),
            Action::Scroll {
                horizontal: false,
                steps: -3
            }
        );
        assert_eq!(
            Action::parse("scroll:horizontal@+2").unwrap(),
            Action::Scroll {
                horizontal: true,
                steps: 2
            }
        );
        assert_eq!(
            Action::parse("key: ALT+LEFT").unwrap(),
            Action::Key("ALT+LEFT".into())
        );
        assert!(Action::parse("scroll:diagonal@1").is_err());
        assert!(Action::parse("beep").is_err());
    }

    #[test]
    fn toggle_flips_sink() {
        let profile = Profile::parse(
            "[meta]\nname=\"t\"\n[bindings.swipe]\nup = \"toggle\"\ndown = \"key:PAGEDOWN\"\n",
        )
        .unwrap();
        let mut sink = UinputSink::noop();
        dispatch_gesture(Swipe::Up, &profile, &mut sink).unwrap();
        assert!(!sink.is_enabled());
        dispatch_gesture(Swipe::Down, &profile, &mut sink).unwrap();
        dispatch_gesture(Swipe::Left, &profile, &mut sink).unwrap();
        dispatch_gesture(Swipe::Up, &profile, &mut sink).unwrap();
        assert!(sink.is_enabled());
    }

    /// Zombie children of this process, from /proc/<pid>/stat.
    #[cfg(target_os = "linux")]
    fn defunct_children() -> usize {
        let me = std::process::id().to_string();
        let Ok(rd) = std::fs::read_dir("/proc") else {
            return 0;
        };
        rd.flatten()
            .filter_map(|e| std::fs::read_to_string(e.path().join("stat")).ok())
            .filter(|stat| {
                // "<pid> (<comm>) <state> <ppid> ..."
                let Some((_, rest)) = stat.rsplit_once(')') else {
                    return false;
                };
                let mut fields = rest.split_whitespace();
                fields.next() == Some("Z") && fields.next() == Some(me.as_str())
            })
            .count()
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn cmd_children_are_reaped() {
        let profile = Profile::parse(
            "[meta]\nname=\"t\"\nallow_commands = true\n[bindings.swipe]\nright = \"cmd:true\"\n",
        )
        .unwrap();
        let mut sink = UinputSink::noop();
        for _ in 0..3 {
            dispatch_gesture(Swipe::Right, &profile, &mut sink).unwrap();
        }

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while defunct_children() > 0 && std::time::Instant::now() < deadline {
            thread::sleep(std::time::Duration::from_millis(20));
        }
        assert_eq!(defunct_children(), 0);
    }
}
