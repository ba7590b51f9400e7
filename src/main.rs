mod actions;
mod cli;
mod config;
mod gestures;
mod history;
mod input;
mod ipc;
mod logging;
mod replay;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
