//! # TickOS Configuration
//!
//! Compile-time constants governing the kernel. All limits are fixed at
//! compile time — no dynamic allocation.

/// Maximum number of tasks the kernel can ever create, the idle task
/// included. Ids are never reused, so this is also a lifetime limit.
pub const MAX_TASKS: usize = 8;

/// SysTick frequency in Hz. One tick is the kernel's time quantum and the
/// unit of [`crate::kernel::delay`].
pub const TICK_HZ: u32 = 100;

/// Length of one scheduler tick in milliseconds.
pub const TICK_PERIOD_MS: u32 = 1000 / TICK_HZ;

/// Maximum length of a task name in bytes. Longer names are truncated.
pub const TASK_NAME_MAX_LEN: usize = 8;

/// Stack size of the idle task in bytes.
pub const IDLE_TASK_STACK_SIZE: usize = 512;

/// Bytes of RAM reserved for task stacks. Stacks are carved from the top
/// of this region downwards and never returned.
pub const STACK_ARENA_SIZE: usize = 12 * 1024;

/// Smallest stack a task may ask for: room for the initial register frame
/// plus a few words of its own.
pub const MIN_STACK_SIZE: usize = 128;

/// Record the deepest stack pointer seen at each context switch so
/// [`crate::kernel::task_info`] can report a high-water mark.
pub const RECORD_STACK_USAGE: bool = true;

/// Number of software timer slots.
pub const MAX_TIMERS: usize = 8;

/// Period of the software timer service interrupt in milliseconds.
pub const TIMER_PERIOD_MS: u32 = 1;

/// Frequency of the external crystal (HSE) in Hz.
pub const HSE_HZ: u32 = 8_000_000;

/// PLL multiplier applied to the HSE.
pub const PLL_MUL: u32 = 9;

/// Core clock in Hz once `arch::port::configure_system_clock()` has switched
/// the STM32F103 to the PLL. Out of reset the core runs from the 8 MHz HSI
/// instead.
pub const SYSTEM_CLOCK_HZ: u32 = HSE_HZ * PLL_MUL;

const _: () = assert!(TICK_HZ > 0 && TICK_HZ <= 1000, "TICK_HZ must be in 1..=1000");
const _: () = assert!(IDLE_TASK_STACK_SIZE >= MIN_STACK_SIZE);
const _: () = assert!(IDLE_TASK_STACK_SIZE <= STACK_ARENA_SIZE);
