//! # Binary Mutex
//!
//! Task-level mutual exclusion with an owner. Acquisition is a test-and-set
//! on the owner inside a critical section; a blocked [`Mutex::lock`] just
//! yields and tries again on its next turn.
//!
//! There is no priority inheritance and no recursion: a task that locks a
//! mutex it already holds waits forever. A task that exits while holding a
//! mutex leaves it locked.

use core::cell::Cell;

use crate::error::{KernelError, Result};
use crate::kernel;
use crate::sync::{self, CriticalSection};
use crate::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    Free,
    Held(TaskId),
    /// Set by `deinit()`; terminal.
    Invalid,
}

/// A binary mutex owned by at most one task.
///
/// ```ignore
/// static SHARED: Mutex = Mutex::new();
///
/// fn worker(_: usize) -> i32 {
///     SHARED.lock()?;
///     // ...
///     SHARED.unlock()?;
/// }
/// ```
pub struct Mutex {
    state: ::critical_section::Mutex<Cell<LockState>>,
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            state: ::critical_section::Mutex::new(Cell::new(LockState::Free)),
        }
    }

    /// Take the mutex for the current task if nobody holds it. Never blocks.
    ///
    /// # Returns
    /// - `Err(Busy)`: held by a task (the caller included)
    /// - `Err(Parameter)`: the mutex was invalidated by `deinit()`
    pub fn try_lock(&self) -> Result<()> {
        sync::critical_section(|cs| {
            let me = kernel::current_task_id_in(cs);
            self.acquire(cs, me)
        })
    }

    /// Take the mutex, yielding the CPU between attempts until it is free.
    ///
    /// Returns `Err(Parameter)` at once if the mutex was invalidated.
    pub fn lock(&self) -> Result<()> {
        loop {
            match self.try_lock() {
                Err(KernelError::Busy) => kernel::yield_now(),
                other => return other,
            }
        }
    }

    /// Release the mutex.
    ///
    /// # Returns
    /// - `Err(OwnershipViolation)`: the caller is not the owner; nothing
    ///   changes
    /// - `Err(Parameter)`: the mutex was invalidated
    pub fn unlock(&self) -> Result<()> {
        sync::critical_section(|cs| {
            let me = kernel::current_task_id_in(cs);
            self.release(cs, me)
        })
    }

    /// Wait until the mutex can be taken, then invalidate it for good.
    /// Blocks forever if the holder never unlocks.
    pub fn deinit(&self) {
        // An already invalid mutex is simply left invalid
        let _ = self.lock();
        sync::critical_section(|cs| self.state.borrow(cs).set(LockState::Invalid));
    }

    /// Task currently holding the mutex.
    pub fn owner(&self) -> Option<TaskId> {
        sync::critical_section(|cs| match self.state.borrow(cs).get() {
            LockState::Held(owner) => Some(owner),
            _ => None,
        })
    }

    fn acquire(&self, cs: CriticalSection<'_>, who: TaskId) -> Result<()> {
        let state = self.state.borrow(cs);
        match state.get() {
            LockState::Free => {
                state.set(LockState::Held(who));
                Ok(())
            }
            LockState::Held(_) => Err(KernelError::Busy),
            LockState::Invalid => Err(KernelError::Parameter),
        }
    }

    fn release(&self, cs: CriticalSection<'_>, who: TaskId) -> Result<()> {
        let state = self.state.borrow(cs);
        match state.get() {
            LockState::Held(owner) if owner == who => {
                state.set(LockState::Free);
                Ok(())
            }
            LockState::Invalid => Err(KernelError::Parameter),
            _ => Err(KernelError::OwnershipViolation),
        }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}
