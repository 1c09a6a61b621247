//! Panic reporting for message and command tasks
//!
//! Tasks recover panics at their boundary with `catch_unwind`; the hook
//! installed here records the stack trace at the panic site through `tracing`.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};

static PANIC_HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Route panic reports through `tracing`. Installing twice is a no-op.
pub fn install_panic_hook() {
    if PANIC_HOOK_INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }

    panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();

        tracing::error!(
            location = %location,
            "Panic: {}\n{}",
            panic_message(info.payload()),
            Backtrace::force_capture()
        );
    }));
}

/// Message carried by a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
