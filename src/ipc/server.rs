use anyhow::{Result, anyhow};
use log::{error, info, warn};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    io::{BufRead, BufReader, Write},
    os::unix::net::{UnixListener, UnixStream},
    path::Path,
    sync::{
        Arc, Mutex,
        mpsc::{self, Sender},
    },
    thread,
    time::Duration,
};

use super::pipeline::{GestureStats, PipelineMsg, run_pipeline};
use super::runtime::socket_path;
use crate::config::DaemonConfigState;

pub fn run_daemon() -> Result<()> {
    // socket
    let sock = socket_path()?;
    if sock.exists() {
        let _ = std::fs::remove_file(&sock);
    }
    let listener = UnixListener::bind(&sock)?;
    info!("daemon: listening on {}", sock.display());

    // state
    let mut state = DaemonState::new()?;
    info!("daemon: active profile '{}'", state.cfg.active_name);

    // channels
    let (tx_req, rx_req) = mpsc::channel::<IpcMsg>();

    // gesture thread
    let gesture_thread = GestureThread::start(state.cfg.profile.clone(), state.stats.clone());

    let _signals = watch_signals(tx_req.clone())?;
    let _watcher = match watch_profiles(&state.cfg.profiles_dir, tx_req.clone()) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!("profile hot reload disabled: {e}");
            None
        }
    };

    // accept loop
    listener.set_nonblocking(true)?;
    loop {
        if let Ok((stream, _)) = listener.accept() {
            let tx = tx_req.clone();
            let st_snapshot = state.clone_shallow();
            thread::spawn(move || {
                if let Err(e) = handle_client(stream, st_snapshot, tx) {
                    error!("ipc client error: {e}");
                }
            });
        }

        let mut reload = false;
        while let Ok(msg) = rx_req.try_recv() {
            match msg {
                IpcMsg::Reload => reload = true,
                IpcMsg::UseProfile(name) => {
                    if let Err(e) = state.cfg.set_active(&name) {
                        error!("use profile failed: {e}");
                    } else {
                        gesture_thread.send(PipelineMsg::Profile(state.cfg.profile.clone()));
                        info!("switched active profile to {}", state.cfg.active_name);
                    }
                }
                IpcMsg::Reset => gesture_thread.send(PipelineMsg::Reset),
                IpcMsg::Shutdown => {
                    info!("daemon: shutting down");
                    gesture_thread.send(PipelineMsg::Shutdown);
                    let _ = std::fs::remove_file(&sock);
                    return Ok(());
                }
            }
        }
        if reload {
            if let Err(e) = state.cfg.reload() {
                error!("reload failed, keeping last good profile: {e}");
            } else {
                gesture_thread.send(PipelineMsg::Profile(state.cfg.profile.clone()));
                info!("profile reloaded");
            }
        }

        thread::sleep(Duration::from_millis(5));
    }
}

fn handle_client(mut stream: UnixStream, st: DaemonState, tx_req: Sender<IpcMsg>) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }
    let req: serde_json::Value = serde_json::from_str(&line)?;
    let op = req.get("op").and_then(|v| v.as_str()).unwrap_or("");

    let resp = match op {
        "status" => {
            let stats = st.stats.lock().unwrap_or_else(|p| p.into_inner()).clone();
            serde_json::json!({"ok": true, "data": {
                "active_profile": st.cfg.active_name,
                "socket": socket_path().ok(),
                "timeout_ms": st.cfg.profile.session.timeout_ms,
                "sensor": stats,
            }})
        }
        "reload" => {
            let _ = tx_req.send(IpcMsg::Reload);
            serde_json::json!({"ok": true, "data": {"active_profile": st.cfg.active_name}})
        }
        "use" => {
            let name = req.get("profile").and_then(|v| v.as_str()).unwrap_or("");
            if st.cfg.list_profiles().iter().any(|p| p == name) {
                let _ = tx_req.send(IpcMsg::UseProfile(name.to_string()));
                serde_json::json!({"ok": true, "data": {"active_profile": name}})
            } else {
                serde_json::json!({"ok": false, "error": format!("profile not found: {name}")})
            }
        }
        "list" => {
            let list = st.cfg.list_profiles();
            serde_json::json!({"ok": true, "data": {"profiles": list, "active": st.cfg.active_name}})
        }
        "doctor" => {
            let report = st.cfg.doctor_report();
            serde_json::json!({"ok": true, "data": report})
        }
        "reset" => {
            let _ = tx_req.send(IpcMsg::Reset);
            serde_json::json!({"ok": true, "data": "session cleared"})
        }
        "shutdown" => serde_json::json!({"ok": true, "data": "shutting down"}),
        _ => serde_json::json!({"ok": false, "error": format!("unknown op: {op}")}),
    };

    writeln!(stream, "{resp}")?;
    // answer first; the daemon exits as soon as it sees the message
    if op == "shutdown" {
        let _ = tx_req.send(IpcMsg::Shutdown);
    }
    Ok(())
}

struct DaemonState {
    pub cfg: DaemonConfigState,
    pub stats: Arc<Mutex<GestureStats>>,
}

impl DaemonState {
    fn new() -> Result<Self> {
        let cfg = DaemonConfigState::load_or_install_default()?;
        Ok(Self {
            cfg,
            stats: Arc::new(Mutex::new(GestureStats::default())),
        })
    }
    fn clone_shallow(&self) -> Self {
        Self {
            cfg: self.cfg.clone(),
            stats: self.stats.clone(),
        }
    }
}

enum IpcMsg {
    Reload,
    UseProfile(String),
    Reset,
    Shutdown,
}

struct GestureThread {
    tx: Sender<PipelineMsg>,
    _thread: thread::JoinHandle<()>,
}

impl GestureThread {
    fn start(profile: crate::config::Profile, stats: Arc<Mutex<GestureStats>>) -> Self {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            if let Err(e) = run_pipeline(profile, stats, rx) {
                error!("gesture pipeline failed: {e}");
            }
        });
        Self {
            tx,
            _thread: handle,
        }
    }
    fn send(&self, msg: PipelineMsg) {
        if self.tx.send(msg).is_err() {
            warn!("gesture thread is gone");
        }
    }
}

fn watch_signals(tx: Sender<IpcMsg>) -> Result<thread::JoinHandle<()>> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    Ok(thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!("daemon: received signal {sig}");
            let _ = tx.send(IpcMsg::Shutdown);
        }
    }))
}

fn watch_profiles(dir: &Path, tx: Sender<IpcMsg>) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let Ok(ev) = res else { return };
        let touches_profile = ev
            .paths
            .iter()
            .any(|p| p.extension().is_some_and(|e| e == "toml"));
        if touches_profile && matches!(ev.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            let _ = tx.send(IpcMsg::Reload);
        }
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

// client helper
pub fn client_request(req: serde_json::Value) -> Result<serde_json::Value> {
    let sock = socket_path()?;
    if !sock.exists() {
        return Err(anyhow!(
            "swipectl daemon is not running (socket missing at {})",
            sock.display()
        ));
    }
    let mut stream = UnixStream::connect(sock)?;
    let line = serde_json::to_string(&req)? + "\n";
    stream.write_all(line.as_bytes())?;
    let mut reader = BufReader::new(stream);
    let mut resp = String::new();
    reader.read_line(&mut resp)?;
    let v: serde_json::Value = serde_json::from_str(&resp)?;
    Ok(v)
}
