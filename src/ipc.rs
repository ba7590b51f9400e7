//! Daemon, control socket and gesture thread.

mod dispatch;
mod pipeline;
mod runtime;
mod server;

pub use dispatch::dispatch_gesture;
pub use pipeline::{ListenOptions, run_foreground};
pub use server::{client_request, run_daemon};
