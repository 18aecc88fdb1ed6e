//! # TickOS — Tick-driven Task Kernel
//!
//! A small round-robin task kernel for single-core ARM Cortex-M3
//! microcontrollers (STM32F103 class), with the services drivers and a
//! command shell build on.
//!
//! ## Overview
//!
//! - **Scheduler**: strictly circular round-robin over a static task table.
//!   The SysTick interrupt drives preemption and wakes sleeping tasks.
//! - **Context switching**: PendSV saves and restores R4–R11 on each task's
//!   own process stack; the hardware does the rest.
//! - **Mutex**: binary, owned, non-recursive; waiters yield.
//! - **Software timers**: 1 ms one-shot and auto-restart timers on their
//!   own periodic interrupt.
//! - **Ring buffer**: byte FIFO for interrupt producers and task consumers.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                   │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                 │
//! │   init() · create_task() · start() · delay() · yield   │
//! ├──────────────┬──────────────┬──────────────┬───────────┤
//! │  Scheduler   │    Mutex     │   Timers     │ Ring buf  │
//! │ scheduler.rs │   mutex.rs   │   timer.rs   │ ringbuf.rs│
//! │  ─ on_tick() │  ─ lock()    │  ─ create()  │  ─ put()  │
//! │  ─ commit_   │  ─ unlock()  │  ─ service_  │  ─ get()  │
//! │    switch()  │              │    period()  │           │
//! ├──────────────┴──────────────┴──────────────┴───────────┤
//! │   Task table (task.rs) · Stack arena (stack.rs)        │
//! │   Critical sections (sync.rs) · Errors (error.rs)      │
//! ├────────────────────────────────────────────────────────┤
//! │   Arch port (arch/cortex_m3.rs, arch/host.rs)          │
//! │   PendSV · SysTick · TIM4 · Initial frame (frame.rs)   │
//! ├────────────────────────────────────────────────────────┤
//! │         ARM Cortex-M3 Hardware (Thumb-2)               │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Task Lifecycle
//!
//! A task is `Created` until it is first switched in, then alternates
//! between `Running` and `Waiting` (`delay()`/`msleep()`). When its entry
//! function returns it becomes `Exited`; the next scheduling pass that
//! walks over it resets the slot to `Invalid`. Ids and stacks are never
//! reused.
//!
//! ## Memory Model
//!
//! - **No heap**: all state is statically allocated
//! - **Fixed task table**: `[TaskRecord; MAX_TASKS]`
//! - **Stack arena**: one static region, carved downwards per task
//! - **Critical sections**: `critical-section` with the `cortex-m`
//!   single-core implementation on target
//!
//! ## Host Builds
//!
//! On anything but bare-metal ARM the `arch::host` port replaces the
//! Cortex-M3 one, so the scheduler, mutex, timers and ring buffer run
//! under `cargo test`.

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod error;
pub mod sync;
pub mod task;
pub mod stack;
pub mod scheduler;
pub mod arch;
pub mod kernel;
pub mod mutex;
pub mod timer;
pub mod ringbuf;

pub use error::{KernelError, Result};
