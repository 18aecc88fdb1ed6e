//! # Synchronization Primitives
//!
//! Interrupt-safe critical section abstractions. Disabling interrupts is
//! the kernel's only mutual-exclusion mechanism: every access to the task
//! table, the current-task reference, mutex owners and the timer list
//! happens inside one of these sections.
//!
//! On the target the implementation comes from `cortex-m`'s
//! `critical-section-single-core` feature (`cpsid i` / restore PRIMASK).
//! Host test builds use the `critical-section` std implementation.

use core::cell::RefCell;

pub use ::critical_section::CriticalSection;

/// Interrupt-shared state: a `RefCell` that can only be reached with a
/// critical-section token in hand.
pub type IrqCell<T> = ::critical_section::Mutex<RefCell<T>>;

/// Execute a closure within a critical section (interrupts disabled).
///
/// Sections nest: the previous interrupt state is restored on exit, so
/// calling this from an ISR or from inside another section is fine.
///
/// # Usage
/// ```ignore
/// sync::critical_section(|cs| {
///     // Access shared state safely
/// });
/// ```
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    ::critical_section::with(f)
}

/// Borrow an [`IrqCell`] mutably for the duration of `f`.
#[inline]
pub fn with_cell<T, F, R>(cell: &IrqCell<T>, f: F) -> R
where
    F: FnOnce(&mut T) -> R,
{
    critical_section(|cs| f(&mut *cell.borrow_ref_mut(cs)))
}
