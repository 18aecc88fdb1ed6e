//! # Kernel
//!
//! Top-level kernel initialization and public task API for TickOS.
//!
//! The kernel owns the single process-wide [`Scheduler`] instance. It is
//! reachable only through a critical section, and the kernel assumes one
//! core and non-reentrant access: interrupts that touch it (SysTick,
//! PendSV) never nest inside one another.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► port::configure_system_clock() ← HSE → PLL, 72 MHz
//!         ├─► kernel::init()        ← Reset task table, create idle task
//!         ├─► kernel::create_task() ← Register tasks (×N)
//!         └─► kernel::start()       ← Launch scheduler (no return)
//!               ├─► Pick first task, fabricate its frame
//!               ├─► Configure SysTick (fatal on failure)
//!               ├─► Set interrupt priorities
//!               └─► Start first task via port::start_first_task()
//! ```
//!
//! ## Limitations
//!
//! Tasks cannot be deleted, and a task that exits while holding a
//! [`crate::mutex::Mutex`] keeps it locked forever.

use core::cell::RefCell;

use log::{debug, error, warn};

use crate::arch::frame::FrameEntry;
use crate::arch::port;
use crate::config::{IDLE_TASK_STACK_SIZE, STACK_ARENA_SIZE, TICK_PERIOD_MS};
use crate::error::{KernelError, Result};
use crate::scheduler::{Scheduler, TickSource};
use crate::stack::StackArena;
use crate::sync::{self, CriticalSection, IrqCell};
use crate::task::{TaskFn, TaskId, TaskInfo};

// ---------------------------------------------------------------------------
// Global kernel state
// ---------------------------------------------------------------------------

static KERNEL: IrqCell<Scheduler> = IrqCell::new(RefCell::new(Scheduler::new()));

/// Memory all task stacks are carved from.
#[repr(C, align(8))]
struct StackPool([u8; STACK_ARENA_SIZE]);

static mut STACK_POOL: StackPool = StackPool([0; STACK_ARENA_SIZE]);

/// Run `f` on the kernel's scheduler inside a critical section.
pub(crate) fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    sync::with_cell(&KERNEL, f)
}

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Initialize the TickOS kernel.
///
/// Resets every task slot, rewinds the stack arena, and creates the idle
/// task, which is the current task until [`start`] runs. Must be called
/// before any other kernel function.
pub fn init() {
    // Safety: the pool is only ever handed to the scheduler, here.
    let arena = unsafe {
        StackArena::new(
            core::ptr::addr_of_mut!(STACK_POOL) as *mut u8,
            STACK_ARENA_SIZE,
        )
    };
    let entry = FrameEntry {
        trampoline: task_trampoline as usize as u32,
        exit: start_error as usize as u32,
    };

    // Cannot fail: the idle stack fits the arena by construction (config.rs)
    match with_scheduler(|s| s.init(arena, entry, idle_task, IDLE_TASK_STACK_SIZE)) {
        Ok(id) => debug!("kernel init, idle task id={}", id),
        Err(err) => error!("idle task creation failed: {}", err),
    }
}

/// Create a new task and register it with the scheduler.
///
/// # Parameters
/// - `entry`: task function; it receives `arg` and may return, in which
///   case the task exits
/// - `arg`: opaque word passed to `entry`
/// - `stack_size`: bytes of stack, at least `MIN_STACK_SIZE`
/// - `name`: up to 8 bytes; `None` gives `Tsk<id>`
///
/// # Returns
/// - `Ok(task_id)`
/// - `Err(Parameter)`: zero or too small `stack_size`
/// - `Err(ResourceExhausted)`: the task table or the stack arena is full
///
/// # Example
/// ```ignore
/// kernel::create_task(blink, LED_PIN, 512, Some("blink"))?;
/// ```
pub fn create_task(
    entry: TaskFn,
    arg: usize,
    stack_size: usize,
    name: Option<&str>,
) -> Result<TaskId> {
    let created = with_scheduler(|s| {
        let id = s.create_task(entry, arg, stack_size, name)?;
        s.task_info(id)
    });

    match created {
        Ok(info) => {
            debug!(
                "create task[{}], id={}, ss={}",
                info.name, info.id, info.stack_size
            );
            Ok(info.id)
        }
        Err(err) => {
            warn!("create task {:?} failed: {}", name, err);
            Err(err)
        }
    }
}

/// Task deletion is not supported: stacks are never reclaimed.
pub fn delete_task(_id: TaskId) -> Result<()> {
    Err(KernelError::Unsupported)
}

/// Start the TickOS scheduler. **Does not return.**
///
/// Picks the first runnable task, programs SysTick, and jumps into the
/// task on its own stack. Everything on the caller's stack is abandoned.
///
/// If SysTick cannot be programmed nothing could ever be scheduled; the
/// failure is logged and the CPU halts.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn start(mut core_peripherals: cortex_m::Peripherals) -> ! {
    cortex_m::interrupt::disable();

    let first_sp = with_scheduler(|s| {
        let sp = s.prepare_start();
        debug!("start, first task id={}", s.current());
        sp
    });

    if let Err(err) = port::configure_systick(&mut core_peripherals.SYST) {
        error!("tick source init failed: {}", err);
        halt();
    }
    port::set_interrupt_priorities(&mut core_peripherals.SCB);

    unsafe { port::start_first_task(first_sp) }
}

/// Delay the current task for `ticks` scheduler ticks.
///
/// The task is marked `Waiting` and gives up the CPU at once; it becomes
/// runnable again after `ticks` hardware ticks (a zero delay lasts until
/// the next tick).
pub fn delay(ticks: u16) {
    let switch = with_scheduler(|s| {
        s.block_current(ticks);
        s.on_tick(TickSource::Software)
    });
    if switch.is_some() {
        port::request_context_switch();
    }
}

/// Sleep for at least `ms` milliseconds, rounded up to whole ticks.
///
/// The real sleep time depends on scheduling; use the timer service for
/// accurate timing.
pub fn msleep(ms: u16) {
    delay(ms_to_ticks(ms));
}

/// Give up the rest of this turn without blocking.
pub fn yield_now() {
    let switch = with_scheduler(|s| s.on_tick(TickSource::Software));
    if switch.is_some() {
        port::request_context_switch();
    }
}

/// Snapshot of a task that has been created and not yet reclaimed.
///
/// # Returns
/// `Err(Parameter)` for unknown ids and reclaimed (`Invalid`) slots.
pub fn task_info(id: TaskId) -> Result<TaskInfo> {
    with_scheduler(|s| s.task_info(id))
}

/// Id of the task currently running.
pub fn current_task_id() -> TaskId {
    sync::critical_section(current_task_id_in)
}

/// [`current_task_id`] for callers already inside a critical section.
pub(crate) fn current_task_id_in(cs: CriticalSection<'_>) -> TaskId {
    KERNEL.borrow_ref(cs).current()
}

/// Convert milliseconds to scheduler ticks, rounding up, at least one.
pub const fn ms_to_ticks(ms: u16) -> u16 {
    let ticks = (ms as u32).div_ceil(TICK_PERIOD_MS);
    if ticks == 0 {
        1
    } else if ticks > u16::MAX as u32 {
        u16::MAX
    } else {
        ticks as u16
    }
}

// ---------------------------------------------------------------------------
// Port entry points
// ---------------------------------------------------------------------------

/// Scheduling pass for one elapsed hardware tick. Called from SysTick.
pub(crate) fn on_hardware_tick() {
    if with_scheduler(|s| s.on_tick(TickSource::Hardware)).is_some() {
        port::request_context_switch();
    }
}

/// Context-switch trap bookkeeping: record where the outgoing task's
/// registers were saved and return the stack to restore.
pub(crate) fn switch_context(saved_sp: *mut u32) -> *mut u32 {
    with_scheduler(|s| s.commit_switch(saved_sp))
}

// ---------------------------------------------------------------------------
// Task bodies the kernel provides
// ---------------------------------------------------------------------------

/// First code every task runs; its fabricated frame points here with the
/// task id in R0. Runs the entry function, marks the task `Exited` and
/// yields for good.
extern "C" fn task_trampoline(task_id: usize) -> ! {
    debug!("enter task trampoline (id={})", task_id);
    run_task(task_id);

    // An exited task is never picked again
    loop {
        yield_now();
    }
}

/// Run a task's entry function to completion and mark it `Exited`.
///
/// # Returns
/// The entry function's return code, or `None` for an empty slot.
fn run_task(task_id: TaskId) -> Option<i32> {
    let code = with_scheduler(|s| s.task_entry(task_id)).map(|(entry, arg)| entry(arg));
    if let Some(code) = code {
        debug!("task {} returned {}", task_id, code);
    }
    with_scheduler(|s| s.exit_task(task_id));
    code
}

/// Planted as LR of every fresh frame. Unreachable unless a frame is
/// corrupted.
extern "C" fn start_error() -> ! {
    halt()
}

/// Keeps one task runnable at all times.
fn idle_task(_: usize) -> i32 {
    loop {
        core::hint::spin_loop();
    }
}

fn halt() -> ! {
    loop {
        #[cfg(all(target_arch = "arm", target_os = "none"))]
        cortex_m::asm::wfi();
        #[cfg(not(all(target_arch = "arm", target_os = "none")))]
        core::hint::spin_loop();
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

/// Serializes tests that touch the process-wide kernel or timer service.
#[cfg(test)]
pub(crate) fn test_guard() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_TASKS;
    use crate::task::TaskStatus;
    use core::sync::atomic::{AtomicUsize, Ordering};

    fn work(_: usize) -> i32 {
        0
    }

    fn status(id: TaskId) -> TaskStatus {
        task_info(id).unwrap().status
    }

    #[test]
    fn test_init_makes_idle_current() {
        let _g = test_guard();
        init();
        assert_eq!(current_task_id(), 0);
        let idle = task_info(0).unwrap();
        assert_eq!(idle.name.as_str(), "idle");
        assert_eq!(idle.stack_size, IDLE_TASK_STACK_SIZE);
        assert_eq!(task_info(1), Err(KernelError::Parameter));
    }

    #[test]
    fn test_create_until_full() {
        let _g = test_guard();
        init();
        let mut last = 0;
        for _ in 1..MAX_TASKS {
            let id = create_task(work, 0, 512, None).unwrap();
            assert!(id > last);
            last = id;
        }
        assert_eq!(
            create_task(work, 0, 512, None),
            Err(KernelError::ResourceExhausted)
        );
        assert_eq!(create_task(work, 0, 0, None), Err(KernelError::Parameter));
    }

    #[test]
    fn test_init_starts_over() {
        let _g = test_guard();
        init();
        create_task(work, 0, 512, None).unwrap();
        init();
        assert_eq!(create_task(work, 0, 512, None), Ok(1));
    }

    #[test]
    fn test_yield_and_delay_switch_tasks() {
        let _g = test_guard();
        init();
        let a = create_task(work, 0, 512, Some("a")).unwrap();
        let b = create_task(work, 0, 512, Some("b")).unwrap();
        assert_eq!(status(a), TaskStatus::Created);

        yield_now();
        assert_eq!(current_task_id(), a);
        assert_eq!(status(a), TaskStatus::Running);

        delay(2);
        assert_eq!(status(a), TaskStatus::Waiting);
        assert_eq!(current_task_id(), b);

        on_hardware_tick();
        assert_eq!(current_task_id(), 0);
        assert_eq!(status(a), TaskStatus::Waiting);

        on_hardware_tick();
        assert_eq!(status(a), TaskStatus::Running);
        assert_eq!(current_task_id(), a);

        // 25 ms at a 10 ms tick is three ticks
        msleep(25);
        assert_eq!(current_task_id(), b);
        on_hardware_tick();
        on_hardware_tick();
        assert_eq!(status(a), TaskStatus::Waiting);
        on_hardware_tick();
        assert_eq!(status(a), TaskStatus::Running);
    }

    #[test]
    fn test_ms_to_ticks_rounds_up() {
        assert_eq!(TICK_PERIOD_MS, 10);
        assert_eq!(ms_to_ticks(0), 1);
        assert_eq!(ms_to_ticks(1), 1);
        assert_eq!(ms_to_ticks(10), 1);
        assert_eq!(ms_to_ticks(11), 2);
        assert_eq!(ms_to_ticks(25), 3);
        assert_eq!(ms_to_ticks(1000), 100);
        assert_eq!(ms_to_ticks(u16::MAX), 6554);
    }

    static SEEN_ARG: AtomicUsize = AtomicUsize::new(0);

    fn record_arg(arg: usize) -> i32 {
        SEEN_ARG.store(arg, Ordering::SeqCst);
        // Runs outside any kernel critical section
        current_task_id() as i32 + 100
    }

    #[test]
    fn test_run_task_calls_entry_then_exits() {
        let _g = test_guard();
        init();
        SEEN_ARG.store(0, Ordering::SeqCst);
        let t = create_task(record_arg, 0xBEEF, 512, Some("rec")).unwrap();

        yield_now();
        assert_eq!(current_task_id(), t);
        assert_eq!(run_task(t), Some(t as i32 + 100));
        assert_eq!(SEEN_ARG.load(Ordering::SeqCst), 0xBEEF);
        assert_eq!(status(t), TaskStatus::Exited);

        // The exiting task's yield moves on; the next scan reclaims it
        yield_now();
        assert_eq!(current_task_id(), 0);
        on_hardware_tick();
        assert_eq!(task_info(t), Err(KernelError::Parameter));

        // Slots that never held a task have no entry to run
        assert_eq!(run_task(MAX_TASKS - 1), None);
        assert_eq!(task_info(MAX_TASKS - 1), Err(KernelError::Parameter));
    }

    #[test]
    fn test_delete_is_unsupported() {
        assert_eq!(delete_task(0), Err(KernelError::Unsupported));
    }
}
