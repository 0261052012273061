//! The kernel's one-way fatal-error path.
//!
//! Every internal invariant violation funnels through [`panic`]: it masks
//! interrupts, logs the reason, invokes the user-supplied hook, and then
//! loops forever. There is no recovery — see [`crate::error::PanicReason`]
//! for the catalog of conditions that land here.
use crate::{error::PanicReason, port::Port};

/// A user-supplied hook invoked once, right before the kernel halts.
///
/// Typical implementations blink an LED pattern encoding `reason`, dump the
/// reason over a debug UART, or trigger a watchdog reset. The hook must not
/// return in a way that resumes kernel execution — if it returns at all,
/// [`panic`] loops forever afterward regardless.
pub trait PanicHook: Sync {
    fn on_panic(&self, reason: PanicReason);
}

/// A hook that does nothing beyond logging. Useful for host-side testing,
/// where the test harness observes the panic through other means.
pub struct NullHook;

impl PanicHook for NullHook {
    fn on_panic(&self, _reason: PanicReason) {}
}

/// Disable interrupts, call the hook, and halt. Never returns.
///
/// # Safety
///
/// Must only be called by kernel internals that have already detected a
/// genuine invariant violation — never in response to a recoverable,
/// caller-facing error (those use [`crate::error::Error`] instead).
pub fn panic<P: Port>(reason: PanicReason) -> ! {
    // Safety: entering a critical section we never leave is the point: the
    // kernel must not resume scheduling after a fatal error.
    let _ = unsafe { P::enter_critical() };

    log::error!("kernel panic: {reason}");

    P::panic_hook().on_panic(reason);

    loop {
        // Safety: the CPU is left masked forever; this is an intentional,
        // permanent halt, not a busy-wait that expects preemption.
        unsafe { P::idle_spin() };
    }
}
