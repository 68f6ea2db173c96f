// THEORY:
// `ControlState` is the only thing an asynchronous context (a signal handler, a web
// request) may touch while a capture is running. It holds nothing but atomics, so a
// handler only ever stores a flag. The capture loop polls it once per iteration and
// performs the actual device start/stop itself, on its own thread.
//
// Pause is tracked as two flags: what was asked for (`desired_paused`) and what the
// loop has acted on (`applied_paused`). `take_pause_change` reports the difference
// exactly once.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct ControlState {
    shutdown: AtomicBool,
    desired_paused: AtomicBool,
    applied_paused: AtomicBool,
}

impl ControlState {
    /// Usable in a `static`.
    pub const fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            desired_paused: AtomicBool::new(false),
            applied_paused: AtomicBool::new(false),
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Flips the requested pause state. Safe to call from a signal handler.
    pub fn request_pause_toggle(&self) {
        self.desired_paused.fetch_xor(true, Ordering::SeqCst);
    }

    pub fn request_pause(&self) {
        self.desired_paused.store(true, Ordering::SeqCst);
    }

    pub fn request_resume(&self) {
        self.desired_paused.store(false, Ordering::SeqCst);
    }

    /// The pause state the loop should now apply, if it differs from the one last
    /// applied. `Some(true)` means stop the device, `Some(false)` means start it.
    pub fn take_pause_change(&self) -> Option<bool> {
        let desired = self.desired_paused.load(Ordering::SeqCst);
        let applied = self.applied_paused.swap(desired, Ordering::SeqCst);
        (desired != applied).then_some(desired)
    }

    /// Whether the loop has applied a pause.
    pub fn is_paused(&self) -> bool {
        self.applied_paused.load(Ordering::SeqCst)
    }
}
