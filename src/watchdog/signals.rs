//! SIGINT/SIGTERM handling for interactive runs.
//!
//! Uses the `signal-hook` crate for safe signal registration. The scenario
//! runner polls the interrupt flag while it waits for workers instead of
//! blocking on signals.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGINT, SIGTERM};

// ──────────────────── signal handler ────────────────────

/// Interrupt state shared between the OS signal hooks and the runner.
///
/// `Ordering::Relaxed` suffices: the runner polls the flag on every tick and
/// nothing else is published through it.
#[derive(Clone)]
pub struct SignalHandler {
    interrupt_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler and register SIGINT/SIGTERM hooks.
    ///
    /// Registration is best-effort; failures are reported to stderr but not fatal.
    pub fn new() -> Self {
        let handler = Self::unregistered();
        handler.register_signals();
        handler
    }

    /// Handler whose flag is only set programmatically.
    #[must_use]
    pub fn unregistered() -> Self {
        Self {
            interrupt_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn should_interrupt(&self) -> bool {
        self.interrupt_flag.load(Ordering::Relaxed)
    }

    pub fn request_interrupt(&self) {
        self.interrupt_flag.store(true, Ordering::Relaxed);
    }

    /// The raw flag, for handing to the scenario runner.
    #[must_use]
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt_flag)
    }

    fn register_signals(&self) {
        if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&self.interrupt_flag)) {
            eprintln!("[BKR-SIGNAL] failed to register SIGTERM: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&self.interrupt_flag)) {
            eprintln!("[BKR-SIGNAL] failed to register SIGINT: {e}");
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_handler_is_not_interrupted() {
        let handler = SignalHandler::unregistered();
        assert!(!handler.should_interrupt());
    }

    #[test]
    fn request_interrupt_is_visible_through_clones_and_flag() {
        let handler = SignalHandler::unregistered();
        let clone = handler.clone();
        let flag = handler.flag();
        clone.request_interrupt();
        assert!(handler.should_interrupt());
        assert!(flag.load(Ordering::Relaxed));
    }
}
