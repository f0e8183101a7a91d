//! Progress reporting for the long-running phases of a sync (zip extraction,
//! the push pipeline, the anchor waits).
//!
//! The teacher's `progress.rs` drives an interactive terminal spinner
//! (`\r`-overwritten status line) because `adevice` is a human-facing REPL
//! tool. This binary is invoked by a build system and its stdout/stderr are
//! typically captured to a log file, where ANSI cursor movement just produces
//! noise — so progress here is a single `log::info!` line per phase instead
//! of a redrawn spinner, keeping the same "tell the user what's happening
//! during a slow step" intent without assuming a live TTY.

pub fn update(message: &str) {
    log::info!("{message}");
}
