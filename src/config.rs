use anyhow::{Context, Result, anyhow};
use directories::UserDirs;
use log::{info, warn};
use serde::{Deserialize, Deserializer};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::gestures::{RuleSet, Swipe};
use crate::input::{self, DEFAULT_BAUD};

#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    pub name: Option<String>,
    #[serde(default)]
    pub allow_commands: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Serial {
    /// e.g. /dev/ttyACM0; first detected port when absent
    pub port: Option<String>,
    #[serde(default = "default_baud")]
    pub baud: u32,
}

impl Default for Serial {
    fn default() -> Self {
        Self {
            port: None,
            baud: DEFAULT_BAUD,
        }
    }
}

fn default_baud() -> u32 {
    DEFAULT_BAUD
}

#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    500
}

impl Session {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub meta: Meta,
    #[serde(default)]
    pub serial: Serial,
    #[serde(default)]
    pub session: Session,
    #[serde(default)]
    pub rules: RuleSet,

    // Accept nested/dotted tables and flatten them into "a.b" -> "value"
    #[serde(default, deserialize_with = "deserialize_bindings_flat")]
    pub bindings: HashMap<String, String>,
}

impl Profile {
    pub fn parse(txt: &str) -> Result<Self> {
        let profile: Profile = toml::from_str(txt)?;
        validate_profile(&profile)?;
        Ok(profile)
    }

    pub fn binding(&self, swipe: Swipe) -> Option<&str> {
        self.bindings.get(swipe.binding_key()).map(String::as_str)
    }
}

// --------- custom bindings deserializer (tolerant) ----------
fn deserialize_bindings_flat<'de, D>(
    de: D,
) -> std::result::Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = toml::Value::deserialize(de)?;
    let table = match val {
        toml::Value::Table(t) => t,
        other => {
            return Err(serde::de::Error::custom(format!(
                "bindings must be a table, got {:?}",
                other.type_str()
            )));
        }
    };

    let mut out = HashMap::new();
    flatten_table("", &table, &mut out).map_err(serde::de::Error::custom)?;
    Ok(out)
}

fn flatten_table(
    prefix: &str,
    table: &toml::value::Table,
    out: &mut HashMap<String, String>,
) -> std::result::Result<(), String> {
    for (k, v) in table {
        let key = if prefix.is_empty() {
            k.clone()
        } else {
            format!("{prefix}.{k}")
        };
        match v {
            toml::Value::String(s) => {
                out.insert(key, s.clone());
            }
            toml::Value::Table(sub) => {
                flatten_table(&key, sub, out)?;
            }
            other => {
                return Err(format!(
                    "binding '{}' value must be a string, got {}",
                    key,
                    other.type_str()
                ));
            }
        }
    }
    Ok(())
}
// ------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DaemonConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
}

pub fn config_dir() -> Result<PathBuf> {
    let dirs = UserDirs::new().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(dirs.home_dir().join(".config").join("swipectl"))
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

impl DaemonConfigState {
    pub fn load_or_install_default() -> Result<Self> {
        Self::load_or_install_default_in(config_dir()?)
    }

    pub fn load_or_install_default_in(cfgdir: PathBuf) -> Result<Self> {
        let profdir = cfgdir.join("profiles");
        fs::create_dir_all(&profdir)
            .with_context(|| format!("failed to create {}", profdir.display()))?;

        let def_path = profdir.join("default.toml");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }

        let active_ptr = cfgdir.join("active");
        if !active_ptr.exists() {
            fs::write(&active_ptr, b"default")?;
        }

        let active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        let profile = load_profile(&profdir, &active_name)?;

        Ok(Self {
            active_name,
            profile,
            config_dir: cfgdir,
            profiles_dir: profdir,
            active_ptr,
        })
    }

    /// Keeps the current profile when the new one fails to load.
    pub fn reload(&mut self) -> Result<()> {
        self.profile = load_profile(&self.profiles_dir, &self.active_name)?;
        Ok(())
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let p = self.profiles_dir.join(format!("{name}.toml"));
        if !p.exists() {
            return Err(anyhow!("profile not found: {}", p.display()));
        }
        let profile = load_profile(&self.profiles_dir, name)?;
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        self.profile = profile;
        Ok(())
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                let path = e.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        v.push(stem.to_string());
                    }
                }
            }
        }
        v.sort();
        v
    }

    pub fn doctor_report(&self) -> serde_json::Value {
        let uinput_ok = Path::new("/dev/uinput").exists();
        let serial_group = check_in_group(&["dialout", "uucp"]);
        let ports: Vec<String> = input::discover_ports()
            .into_iter()
            .map(|p| format!("{} ({})", p.path, p.description))
            .collect();
        if ports.is_empty() {
            warn!("doctor: no serial ports detected");
        }
        serde_json::json!({
            "uinput_present": uinput_ok,
            "serial_group_member": serial_group,
            "config_dir": self.config_dir,
            "profiles_dir": self.profiles_dir,
            "active_profile": self.active_name,
            "configured_port": self.profile.serial.port,
            "baud": self.profile.serial.baud,
            "ports": ports,
            "hints": {
                "add_user_to_dialout_group": "sudo usermod -aG dialout $USER && newgrp dialout",
                "udev_rule": "/etc/udev/rules.d/80-uinput.rules"
            }
        })
    }
}

fn load_profile(profiles_dir: &Path, name: &str) -> Result<Profile> {
    let path = profiles_dir.join(format!("{name}.toml"));
    let txt = fs::read_to_string(&path)
        .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
    Profile::parse(&txt).map_err(|e| anyhow!("failed to parse {}: {e}", path.display()))
}

fn validate_profile(p: &Profile) -> Result<()> {
    if p.session.timeout_ms == 0 {
        return Err(anyhow!("session.timeout_ms must be a positive duration"));
    }
    if p.serial.baud == 0 {
        return Err(anyhow!("serial.baud must be positive"));
    }

    for r in &p.rules.vertical {
        if r.latest == 0 || r.mid == 0 || r.out == 0 {
            return Err(anyhow!("vertical rule {r:?} uses channel 0"));
        }
        if !r.direction.is_vertical() {
            return Err(anyhow!(
                "vertical rule ending on {} has direction {}",
                r.latest,
                r.direction
            ));
        }
    }
    for r in &p.rules.horizontal {
        if r.latest == 0 || r.out == 0 {
            return Err(anyhow!("horizontal rule {r:?} uses channel 0"));
        }
    }

    for (k, v) in &p.bindings {
        if !Swipe::ALL.iter().any(|s| s.binding_key() == k) {
            return Err(anyhow!("unknown binding '{}'", k));
        }
        if v.trim().is_empty() {
            return Err(anyhow!("binding '{}' has empty action", k));
        }

        let ok = v.starts_with("mouse:")
            || v.starts_with("scroll:")
            || v.starts_with("key:")
            || v == "toggle"
            || v.starts_with("cmd:");
        if !ok {
            return Err(anyhow!("binding '{}' has invalid action '{}'", k, v));
        }
        if v.starts_with("cmd:") && !p.meta.allow_commands {
            return Err(anyhow!(
                "binding '{}' uses cmd: but allow_commands=false",
                k
            ));
        }
    }
    Ok(())
}

fn check_in_group(groups: &[&str]) -> bool {
    let Ok(s) = fs::read_to_string("/etc/group") else {
        return false;
    };
    let user = whoami::username();
    s.lines().any(|line| {
        let mut fields = line.split(':');
        let name = fields.next().unwrap_or("");
        let members = fields.nth(2).unwrap_or("");
        groups.contains(&name) && members.split(',').any(|u| u == user)
    })
}
