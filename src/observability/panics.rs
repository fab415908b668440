//! Backtraces for recovered panics.
//!
//! `catch_unwind` only sees the payload, after the stack has unwound. The hook
//! installed here captures the backtrace at the panic site and parks it in a
//! thread-local slot, where the recovering code picks it up. Unwinding and
//! recovery happen on the same thread within one poll, so the slot read back
//! belongs to the panic just caught.

use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::sync::Once;

thread_local! {
    static LAST_PANIC: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static INSTALL: Once = Once::new();

/// Install the capturing hook in front of the current one. Idempotent.
pub fn install_hook() {
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let backtrace = Backtrace::force_capture();
            LAST_PANIC.with(|slot| {
                if let Ok(mut slot) = slot.try_borrow_mut() {
                    *slot = Some(backtrace);
                }
            });
            previous(info);
        }));
    });
}

/// Take the backtrace of the most recent panic on this thread.
pub fn take_backtrace() -> Option<Backtrace> {
    LAST_PANIC.with(|slot| slot.try_borrow_mut().ok().and_then(|mut slot| slot.take()))
}
