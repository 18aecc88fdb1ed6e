//! # Task Table Records
//!
//! Defines the task model for TickOS: the per-task record kept in the
//! scheduler's static table, its lifecycle state machine, and the
//! read-only snapshot handed out by [`crate::kernel::task_info`].

use core::fmt;

use crate::config::TASK_NAME_MAX_LEN;

/// Index of a task in the task table. Assigned monotonically from 0 and
/// never reused.
pub type TaskId = usize;

/// Task entry function. Receives the opaque argument given at creation;
/// the return value is logged when the task exits.
pub type TaskFn = fn(usize) -> i32;

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Lifecycle state of a task slot.
///
/// ```text
///   ┌─────────┐ create_task ┌─────────┐ first scheduled ┌─────────┐
///   │ Invalid │ ──────────► │ Created │ ──────────────► │ Running │
///   └─────────┘             └─────────┘                 └─────────┘
///        ▲                                      delay()   │     ▲ block ticks
///        │ next scan                                       ▼     │ expired
///   ┌─────────┐        entry function returns        ┌─────────┐
///   │ Exited  │ ◄─────────────────────────────────── │ Waiting │
///   └─────────┘          (from Running)              └─────────┘
/// ```
///
/// `Running` means "running or runnable"; the scheduler does not keep a
/// separate ready state. A slot that went back to `Invalid` is never
/// handed out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Slot not in use.
    Invalid,
    /// Registered but never scheduled; has no register frame yet.
    Created,
    /// Running now, or runnable.
    Running,
    /// Sleeping until its block ticks run out.
    Waiting,
    /// Entry function returned; reclaimed on the next scheduler scan.
    Exited,
}

impl TaskStatus {
    /// Whether the scheduler may pick a task in this state.
    #[inline]
    pub const fn is_runnable(self) -> bool {
        matches!(self, TaskStatus::Created | TaskStatus::Running)
    }
}

// ---------------------------------------------------------------------------
// Task name
// ---------------------------------------------------------------------------

/// Fixed-capacity task name, stored inline.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TaskName {
    bytes: [u8; TASK_NAME_MAX_LEN],
    len: u8,
}

impl TaskName {
    pub const EMPTY: TaskName = TaskName {
        bytes: [0; TASK_NAME_MAX_LEN],
        len: 0,
    };

    /// Copy `name`, truncating on a character boundary if it is longer than
    /// [`TASK_NAME_MAX_LEN`] bytes.
    pub fn new(name: &str) -> Self {
        let mut end = name.len().min(TASK_NAME_MAX_LEN);
        while !name.is_char_boundary(end) {
            end -= 1;
        }

        let mut out = Self::EMPTY;
        out.bytes[..end].copy_from_slice(&name.as_bytes()[..end]);
        out.len = end as u8;
        out
    }

    /// Name given to tasks created without one: `Tsk` plus the id as three
    /// decimal digits.
    pub fn generated(id: TaskId) -> Self {
        let id = id % 1000;
        let mut out = Self::EMPTY;
        out.bytes[..3].copy_from_slice(b"Tsk");
        out.bytes[3] = b'0' + (id / 100) as u8;
        out.bytes[4] = b'0' + (id / 10 % 10) as u8;
        out.bytes[5] = b'0' + (id % 10) as u8;
        out.len = 6;
        out
    }

    pub fn as_str(&self) -> &str {
        // Only ever filled from a &str cut on a char boundary, or ASCII
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

// ---------------------------------------------------------------------------
// Task record
// ---------------------------------------------------------------------------

/// One slot of the task table.
///
/// ## Stack bookkeeping
///
/// `stack_top` is the (exclusive) high end of the region carved for this
/// task; the stack grows down from it. `stack_pointer` is the value saved
/// by the last context switch (or the initial frame). `lowest_sp` tracks
/// the deepest saved stack pointer seen so far.
pub struct TaskRecord {
    pub id: TaskId,
    pub entry: Option<TaskFn>,
    pub arg: usize,
    pub stack_top: *mut u32,
    pub stack_pointer: *mut u32,
    pub lowest_sp: *mut u32,
    pub stack_size: usize,
    pub status: TaskStatus,
    /// Ticks left to sleep while `Waiting`.
    pub block_ticks: u16,
    pub name: TaskName,
}

// Safety: the raw pointers refer to this task's own stack region, which is
// carved once from the static arena and never freed. Records are only
// touched inside critical sections.
unsafe impl Send for TaskRecord {}

impl TaskRecord {
    pub const EMPTY: TaskRecord = TaskRecord {
        id: 0,
        entry: None,
        arg: 0,
        stack_top: core::ptr::null_mut(),
        stack_pointer: core::ptr::null_mut(),
        lowest_sp: core::ptr::null_mut(),
        stack_size: 0,
        status: TaskStatus::Invalid,
        block_ticks: 0,
        name: TaskName::EMPTY,
    };

    /// Register a freshly carved task in this slot as `Created`.
    pub fn init(
        &mut self,
        id: TaskId,
        entry: TaskFn,
        arg: usize,
        stack_top: *mut u32,
        stack_size: usize,
        name: TaskName,
    ) {
        self.id = id;
        self.entry = Some(entry);
        self.arg = arg;
        self.stack_top = stack_top;
        self.stack_pointer = stack_top;
        self.lowest_sp = stack_top;
        self.stack_size = stack_size;
        self.status = TaskStatus::Created;
        self.block_ticks = 0;
        self.name = name;
    }

    /// Record a stack pointer saved by a context switch.
    #[inline]
    pub fn save_stack_pointer(&mut self, sp: *mut u32, record_usage: bool) {
        self.stack_pointer = sp;
        if record_usage && (sp as usize) < (self.lowest_sp as usize) {
            self.lowest_sp = sp;
        }
    }

    /// Deepest stack usage observed, in bytes.
    #[inline]
    pub fn high_water_mark(&self) -> usize {
        (self.stack_top as usize).saturating_sub(self.lowest_sp as usize)
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            status: self.status,
            stack_size: self.stack_size,
            high_water_mark: self.high_water_mark(),
            name: self.name,
        }
    }
}

/// Snapshot of a task, as reported by [`crate::kernel::task_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub status: TaskStatus,
    pub stack_size: usize,
    /// Deepest stack usage seen at a context switch, in bytes.
    pub high_water_mark: usize,
    pub name: TaskName,
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: usize) -> i32 {
        0
    }

    #[test]
    fn test_record_init() {
        let mut stack = [0u32; 32];
        let top = unsafe { stack.as_mut_ptr().add(32) };

        let mut rec = TaskRecord::EMPTY;
        assert_eq!(rec.status, TaskStatus::Invalid);

        rec.init(3, noop, 42, top, 128, TaskName::new("worker"));
        assert_eq!(rec.status, TaskStatus::Created);
        assert_eq!(rec.arg, 42);
        assert_eq!(rec.stack_pointer, top);
        assert_eq!(rec.high_water_mark(), 0);
        assert_eq!(rec.info().name.as_str(), "worker");
    }

    #[test]
    fn test_high_water_mark_keeps_deepest() {
        let mut stack = [0u32; 32];
        let top = unsafe { stack.as_mut_ptr().add(32) };
        let mut rec = TaskRecord::EMPTY;
        rec.init(1, noop, 0, top, 128, TaskName::generated(1));

        rec.save_stack_pointer(unsafe { top.sub(16) }, true);
        assert_eq!(rec.high_water_mark(), 64);

        // A shallower switch does not lower the mark
        rec.save_stack_pointer(unsafe { top.sub(4) }, true);
        assert_eq!(rec.high_water_mark(), 64);
        assert_eq!(rec.stack_pointer, unsafe { top.sub(4) });

        rec.save_stack_pointer(unsafe { top.sub(20) }, false);
        assert_eq!(rec.high_water_mark(), 64);
    }

    #[test]
    fn test_name_truncation() {
        assert_eq!(TaskName::new("cmdtask").as_str(), "cmdtask");
        assert_eq!(TaskName::new("a_very_long_name").as_str(), "a_very_l");
        // "é" is two bytes; it must not be split
        assert_eq!(TaskName::new("abcdefgé").as_str(), "abcdefg");
        assert_eq!(TaskName::new("").as_str(), "");
    }

    #[test]
    fn test_generated_name() {
        assert_eq!(TaskName::generated(0).as_str(), "Tsk000");
        assert_eq!(TaskName::generated(7).as_str(), "Tsk007");
        assert_eq!(TaskName::generated(123).as_str(), "Tsk123");
    }

    #[test]
    fn test_runnable_states() {
        assert!(TaskStatus::Created.is_runnable());
        assert!(TaskStatus::Running.is_runnable());
        assert!(!TaskStatus::Waiting.is_runnable());
        assert!(!TaskStatus::Exited.is_runnable());
        assert!(!TaskStatus::Invalid.is_runnable());
    }
}
