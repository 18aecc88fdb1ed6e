//! # Host Port
//!
//! Stands in for the Cortex-M3 port when the kernel is built for a hosted
//! target (unit tests, simulation). There are no registers to swap, so the
//! context-switch trap runs immediately and only does the scheduler's
//! bookkeeping: the outgoing task is "saved" at the stack pointer it
//! already has on record and the pending task becomes current.

use crate::arch::timer_divider;
use crate::config::{SYSTEM_CLOCK_HZ, TIMER_PERIOD_MS};
use crate::error::Result;
use crate::kernel;

/// Perform the context-switch trap synchronously.
///
/// Must be called outside any kernel critical section, as on hardware the
/// trap can only be taken once interrupts are enabled again.
pub fn request_context_switch() {
    let saved = kernel::with_scheduler(|s| s.current_record().stack_pointer);
    kernel::switch_context(saved);
}

/// Validate the timer service period; there is no interrupt to arm.
/// `timer::service_period()` is driven by hand instead.
pub fn arm_timer_source() -> Result<()> {
    timer_divider(SYSTEM_CLOCK_HZ, TIMER_PERIOD_MS).map(|_| ())
}

pub fn disarm_timer_source() {}
