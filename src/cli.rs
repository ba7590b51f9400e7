use anyhow::{Result, anyhow};
use pico_args::Arguments;
use std::{env, path::PathBuf, process::Command};

use crate::actions::UinputSink;
use crate::config::DaemonConfigState;
use crate::gestures::{GestureEngine, Swipe};
use crate::{input, ipc, replay};

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        return ipc::run_daemon();
    }

    // No args -> general help
    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    // Flags-based help (-h/--help)
    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    // First free arg is the subcommand
    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            if let Some(t) = topic {
                print_subcmd_help(&t);
            } else {
                print_help();
            }
            Ok(())
        }

        Some("start") => {
            let exe = std::env::current_exe()?;
            let child = Command::new(exe).arg("--daemon").spawn()?;
            println!("swipectl: started daemon (pid={})", child.id());
            Ok(())
        }

        Some(op @ ("stop" | "status" | "reload" | "list" | "doctor" | "reset")) => {
            let op = if op == "stop" { "shutdown" } else { op };
            let r = ipc::client_request(serde_json::json!({ "op": op }))?;
            print_response(&r);
            Ok(())
        }

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: swipectl use <profile_name>"))?;
            let r = ipc::client_request(serde_json::json!({"op":"use","profile":name}))?;
            print_response(&r);
            Ok(())
        }

        Some("ports") => {
            let ports = input::discover_ports();
            if ports.is_empty() {
                println!("no serial ports detected");
            }
            for p in ports {
                println!("{}\t{}", p.path, p.description);
            }
            Ok(())
        }

        Some("listen") => {
            let opts = ipc::ListenOptions {
                port: pargs.opt_value_from_str("--port")?,
                baud: pargs.opt_value_from_str("--baud")?,
                capture: pargs.opt_value_from_str::<_, PathBuf>("--capture")?,
                actions: pargs.contains("--actions"),
            };
            let cfg = DaemonConfigState::load_or_install_default()?;
            ipc::run_foreground(cfg.profile, opts)
        }

        Some("replay") => {
            let path: PathBuf = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: swipectl replay <capture_file>"))?;
            let cfg = DaemonConfigState::load_or_install_default()?;
            let mut engine =
                GestureEngine::new(cfg.profile.rules.clone(), cfg.profile.session.timeout());
            let hits = replay::replay_file(&path, &mut engine)?;
            for h in &hits {
                println!("{:>8} ms  SwipeGesture:{} ({})", h.at_ms, h.swipe, h.swipe.code());
            }
            println!("{} gesture(s)", hits.len());
            Ok(())
        }

        Some("emit") => {
            // usage:
            //   swipectl emit up
            //   swipectl emit left
            let what: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: swipectl emit <up|down|left|right>"))?;
            let swipe =
                Swipe::parse(&what).ok_or_else(|| anyhow!("unknown swipe direction: {what}"))?;
            let cfg = DaemonConfigState::load_or_install_default()?;
            let mut sink = UinputSink::new()?;
            ipc::dispatch_gesture(swipe, &cfg.profile, &mut sink)?;
            match cfg.profile.binding(swipe) {
                Some(action) => println!("ok: {} -> {action}", swipe.binding_key()),
                None => println!("ok: {} is unbound", swipe.binding_key()),
            }
            Ok(())
        }

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn print_help() {
    println!(
        r#"swipectl — swipe gestures from a six-channel capacitive touch panel

USAGE:
  swipectl help [command]                 Show general or command-specific help
  swipectl start                          Start the daemon
  swipectl stop                           Stop the daemon
  swipectl status                         Show daemon state and gesture counters
  swipectl reload                         Reload active profile
  swipectl use <name>                     Switch active profile
  swipectl list                           List profiles
  swipectl doctor                         Diagnose permissions/serial ports
  swipectl reset                          Clear the current touch session
  swipectl ports                          List serial ports
  swipectl listen [--port P] [--baud B] [--capture FILE] [--actions]
                                          Classify in the foreground
  swipectl replay <file>                  Classify a capture file
  swipectl emit <up|down|left|right>      Run the action bound to a swipe

TIPS:
  - Profiles: ~/.config/swipectl/profiles
  - Active profile pointer: ~/.config/swipectl/active
  - Serial access usually needs the 'dialout' group
  - RUST_LOG=debug shows every raw sensor line
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "start" => println!("usage: swipectl start\nStarts the background daemon."),
        "stop" => println!("usage: swipectl stop\nStops the running daemon."),
        "status" => println!(
            "usage: swipectl status\nShows active profile, serial link, event and gesture counters."
        ),
        "reload" => println!(
            "usage: swipectl reload\nReloads the current profile; keeps last good on error."
        ),
        "use" => {
            println!("usage: swipectl use <name>\nSwitches active profile to <name> and reloads.")
        }
        "list" => {
            println!("usage: swipectl list\nLists available profiles.")
        }
        "doctor" => println!(
            "usage: swipectl doctor\nChecks permissions and lists detected serial ports."
        ),
        "reset" => println!("usage: swipectl reset\nDrops the touch history of the current session."),
        "ports" => println!("usage: swipectl ports\nLists serial ports with USB ids."),
        "listen" => println!(
            "usage: swipectl listen [--port P] [--baud B] [--capture FILE] [--actions]\n\
             Reads the sensor in the foreground and prints SwipeGesture:<dir> lines.\n\
             --capture records '<millis> <line>' for later replay; --actions runs bindings."
        ),
        "replay" => println!(
            "usage: swipectl replay <file>\nFeeds a capture file through the active profile's engine."
        ),
        "emit" => println!("usage: swipectl emit <up|down|left|right>"),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_response(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
