//! # Scheduler
//!
//! Core scheduling logic for TickOS: a strictly circular round-robin over
//! the static task table, with tick-driven wake-up of sleeping tasks.
//!
//! ## Scheduling Algorithm
//!
//! At each scheduling pass:
//! 1. **Expire sleeps** (hardware ticks only): decrement `block_ticks` of
//!    every `Waiting` task, promoting it to `Running` at zero
//! 2. **Select next task**: scan from `current + 1` around the table for the
//!    first `Created`/`Running` task; `Exited` tasks met on the way are
//!    reclaimed to `Invalid`
//! 3. **Request switch**: if the pick differs from the current task, build
//!    its first frame if it never ran, remember it as pending and let the
//!    caller raise the context-switch trap
//!
//! The trap itself ([`Scheduler::commit_switch`]) is the only place that
//! changes `current` after start-up.
//!
//! Software passes (from `delay()`/`yield_now()`) skip step 1 so a sleeping
//! task is never charged twice for the same tick.

use crate::arch::frame::{FrameEntry, InitialFrame, INITIAL_FRAME_BYTES};
use crate::config::{MAX_TASKS, MIN_STACK_SIZE, RECORD_STACK_USAGE};
use crate::error::{KernelError, Result};
use crate::stack::StackArena;
use crate::task::{TaskFn, TaskId, TaskInfo, TaskName, TaskRecord, TaskStatus};

const _: () = assert!(MIN_STACK_SIZE >= INITIAL_FRAME_BYTES);

/// What triggered a scheduling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickSource {
    /// The periodic SysTick interrupt; one tick of time has passed.
    Hardware,
    /// A task asked for a pass (`delay`, `yield_now`, task exit).
    Software,
}

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The kernel's task table and scheduling state. A single instance lives in
/// `kernel.rs`, reachable only inside critical sections.
///
/// ## Design Notes
///
/// - All tasks are stored inline in a fixed-size array (no heap)
/// - `next_id` only grows; a slot is used by at most one task, ever
/// - The idle task created by `init()` guarantees a pass always finds
///   something to run
pub struct Scheduler {
    tasks: [TaskRecord; MAX_TASKS],

    /// Id the next `create_task` hands out.
    next_id: TaskId,

    /// Task whose context is on the CPU.
    current: TaskId,

    /// Task chosen by the last pass, waiting for the trap to switch in.
    pending: Option<TaskId>,

    arena: StackArena,

    /// Code addresses planted in fabricated frames.
    frame_entry: FrameEntry,
}

impl Scheduler {
    /// An empty scheduler with no memory to carve stacks from. Call
    /// [`Scheduler::init`] before use.
    pub const fn new() -> Self {
        Self {
            tasks: [TaskRecord::EMPTY; MAX_TASKS],
            next_id: 0,
            current: 0,
            pending: None,
            arena: StackArena::empty(),
            frame_entry: FrameEntry::NONE,
        }
    }

    /// Reset every slot to `Invalid`, take `arena` as the stack source and
    /// create the idle task, which becomes the current task.
    pub fn init(
        &mut self,
        arena: StackArena,
        frame_entry: FrameEntry,
        idle: TaskFn,
        idle_stack_size: usize,
    ) -> Result<TaskId> {
        for task in self.tasks.iter_mut() {
            *task = TaskRecord::EMPTY;
        }
        self.next_id = 0;
        self.pending = None;
        self.arena = arena;
        self.frame_entry = frame_entry;

        let idle_id = self.create_task(idle, 0, idle_stack_size, Some("idle"))?;
        self.current = idle_id;
        Ok(idle_id)
    }

    /// Register a new task as `Created`.
    ///
    /// # Returns
    /// - `Ok(task_id)` — ids increase by one per successful call
    /// - `Err(Parameter)` — `stack_size` is zero or below `MIN_STACK_SIZE`
    /// - `Err(ResourceExhausted)` — the table or the stack arena is full
    pub fn create_task(
        &mut self,
        entry: TaskFn,
        arg: usize,
        stack_size: usize,
        name: Option<&str>,
    ) -> Result<TaskId> {
        if stack_size == 0 || stack_size < MIN_STACK_SIZE {
            return Err(KernelError::Parameter);
        }
        if self.next_id >= MAX_TASKS {
            return Err(KernelError::ResourceExhausted);
        }

        let region = self.arena.carve(stack_size)?;
        let id = self.next_id;
        let name = match name {
            Some(name) => TaskName::new(name),
            None => TaskName::generated(id),
        };
        self.tasks[id].init(id, entry, arg, region.top, region.size, name);
        self.next_id += 1;

        Ok(id)
    }

    /// Run one scheduling pass.
    ///
    /// # Returns
    /// `Some(next)` if a different task was chosen and the caller must
    /// raise the context-switch trap; `None` to keep running the current
    /// task.
    pub fn on_tick(&mut self, source: TickSource) -> Option<TaskId> {
        if source == TickSource::Hardware {
            self.expire_block_ticks();
        }

        let next = self.find_next_runnable();
        if next == self.current {
            return None;
        }

        match self.tasks[next].status {
            TaskStatus::Created => self.build_initial_frame(next),
            TaskStatus::Running => {}
            _ => return None,
        }

        self.pending = Some(next);
        Some(next)
    }

    /// Wake-up bookkeeping for one elapsed tick.
    fn expire_block_ticks(&mut self) {
        for task in self.tasks.iter_mut() {
            if task.status != TaskStatus::Waiting {
                continue;
            }
            task.block_ticks = task.block_ticks.saturating_sub(1);
            if task.block_ticks == 0 {
                task.status = TaskStatus::Running;
            }
        }
    }

    /// Circular scan starting after the current task. Returns `current`
    /// itself when no other task is runnable.
    fn find_next_runnable(&mut self) -> TaskId {
        let mut id = (self.current + 1) % MAX_TASKS;
        while id != self.current {
            let task = &mut self.tasks[id];
            if task.status.is_runnable() {
                break;
            }
            if task.status == TaskStatus::Exited {
                // Reclaim; the slot stays unused forever
                task.status = TaskStatus::Invalid;
            }
            id = (id + 1) % MAX_TASKS;
        }
        id
    }

    fn build_initial_frame(&mut self, id: TaskId) {
        let task = &mut self.tasks[id];
        let frame = InitialFrame::new(id, self.frame_entry);
        // Safety: stack_top bounds a region of at least MIN_STACK_SIZE bytes
        // carved for this task alone.
        task.stack_pointer = unsafe { frame.write_below(task.stack_top) };
    }

    /// Bookkeeping half of the context-switch trap.
    ///
    /// Stores `saved_sp` (the outgoing task's stack pointer after its
    /// registers were pushed), switches `current` to the pending task,
    /// marks it `Running` and returns the stack pointer to restore from.
    /// Without a pending task the outgoing task simply resumes.
    pub fn commit_switch(&mut self, saved_sp: *mut u32) -> *mut u32 {
        let current = self.current;
        self.tasks[current].save_stack_pointer(saved_sp, RECORD_STACK_USAGE);

        if let Some(next) = self.pending.take() {
            self.current = next;
            self.tasks[next].status = TaskStatus::Running;
        }

        self.tasks[self.current].stack_pointer
    }

    /// Pick and prepare the first task for `start()`.
    ///
    /// # Returns
    /// The stack pointer of the chosen task's fabricated frame.
    pub fn prepare_start(&mut self) -> *mut u32 {
        let first = self.find_next_runnable();
        self.current = first;
        self.pending = None;
        self.build_initial_frame(first);
        self.tasks[first].status = TaskStatus::Running;
        self.tasks[first].stack_pointer
    }

    /// Put the current task to sleep for `ticks` hardware ticks. The caller
    /// follows up with a software pass.
    pub fn block_current(&mut self, ticks: u16) {
        let task = &mut self.tasks[self.current];
        task.status = TaskStatus::Waiting;
        task.block_ticks = ticks;
    }

    /// Look up the entry point for the trampoline on a task's first run.
    pub fn task_entry(&self, id: TaskId) -> Option<(TaskFn, usize)> {
        let task = self.tasks.get(id)?;
        Some((task.entry?, task.arg))
    }

    /// Mark a task whose entry function returned. Unused slots stay
    /// `Invalid`.
    pub fn exit_task(&mut self, id: TaskId) {
        if let Some(task) = self.tasks.get_mut(id) {
            if task.status != TaskStatus::Invalid {
                task.status = TaskStatus::Exited;
            }
        }
    }

    /// Snapshot of a live or exited task.
    ///
    /// # Returns
    /// `Err(Parameter)` for ids outside the table or `Invalid` slots.
    pub fn task_info(&self, id: TaskId) -> Result<TaskInfo> {
        let task = self.tasks.get(id).ok_or(KernelError::Parameter)?;
        match task.status {
            TaskStatus::Invalid => Err(KernelError::Parameter),
            _ => Ok(task.info()),
        }
    }

    /// Id of the task whose context is on the CPU.
    #[inline]
    pub fn current(&self) -> TaskId {
        self.current
    }

    /// Task picked by the last pass and not yet switched in.
    #[inline]
    pub fn pending(&self) -> Option<TaskId> {
        self.pending
    }

    /// Number of ids handed out so far (the idle task included).
    #[inline]
    pub fn task_count(&self) -> usize {
        self.next_id
    }

    /// Get a reference to the current task's record.
    pub fn current_record(&self) -> &TaskRecord {
        &self.tasks[self.current]
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
