//! # Software Timer Service
//!
//! Millisecond one-shot and auto-restart timers driven by their own
//! periodic interrupt (every `TIMER_PERIOD_MS`), independent of the
//! scheduler tick.
//!
//! ## Period Handling
//!
//! On every period each in-use, unpaused timer counts down by one; a timer
//! that reaches zero fires in that same period and is then reloaded
//! (auto-restart) or freed. A timer created with a timeout of `N` ms
//! therefore fires on the `N`-th period, and every `N` periods after that
//! if it restarts. A timeout of 0 fires on the very next period. Because
//! the countdown is reloaded (or the slot freed) in the period it reaches
//! zero, [`remaining_ms`] never reads 0 for a live timer with a non-zero
//! timeout.
//!
//! Callbacks run in interrupt context, in slot order, after the timer table
//! has been updated and the critical section left, so a callback may itself
//! call into this module. Each due timer is checked again right before its
//! callback: one that an earlier callback of the same period destroyed,
//! re-created or paused does not fire. Callbacks must not block.

use core::cell::RefCell;

use heapless::Vec;

use crate::arch::port;
use crate::config::MAX_TIMERS;
use crate::error::{KernelError, Result};
use crate::sync::{self, IrqCell};

/// Index of a timer slot.
pub type TimerId = usize;

/// Timer callback; receives the context word given to [`create`].
pub type TimerCallback = fn(usize);

/// A timer that reached zero in the current period.
#[derive(Debug, Clone, Copy)]
pub struct Due {
    pub id: TimerId,
    /// Slot generation when the timer expired.
    pub generation: u32,
    pub callback: TimerCallback,
    pub ctx: usize,
}

/// Timers due in one period, in slot order.
pub type Fired = Vec<Due, MAX_TIMERS>;

#[derive(Debug, Clone, Copy)]
struct TimerSlot {
    /// Bumped by every create and destroy of this slot.
    generation: u32,
    in_use: bool,
    paused: bool,
    auto_restart: bool,
    remaining_ms: u32,
    init_ms: u32,
    callback: Option<TimerCallback>,
    ctx: usize,
}

impl TimerSlot {
    const FREE: TimerSlot = TimerSlot {
        generation: 0,
        in_use: false,
        paused: false,
        auto_restart: false,
        remaining_ms: 0,
        init_ms: 0,
        callback: None,
        ctx: 0,
    };

    /// Free the slot, ending the life of whatever timer held it.
    fn release(&mut self) {
        *self = TimerSlot {
            generation: self.generation.wrapping_add(1),
            ..TimerSlot::FREE
        };
    }
}

/// The timer table.
pub struct TimerList {
    slots: [TimerSlot; MAX_TIMERS],
}

impl TimerList {
    pub const fn new() -> Self {
        Self {
            slots: [TimerSlot::FREE; MAX_TIMERS],
        }
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(TimerSlot::release);
    }

    /// Claim the first free slot.
    pub fn create(
        &mut self,
        timeout_ms: u32,
        auto_restart: bool,
        callback: TimerCallback,
        ctx: usize,
    ) -> Result<TimerId> {
        let (id, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| !slot.in_use)
            .ok_or(KernelError::ResourceExhausted)?;

        *slot = TimerSlot {
            generation: slot.generation.wrapping_add(1),
            in_use: true,
            paused: false,
            auto_restart,
            remaining_ms: timeout_ms,
            init_ms: timeout_ms,
            callback: Some(callback),
            ctx,
        };
        Ok(id)
    }

    pub fn set_paused(&mut self, id: TimerId, paused: bool) -> Result<()> {
        let slot = self.slot_mut(id)?;
        if slot.in_use {
            slot.paused = paused;
        }
        Ok(())
    }

    /// Load a new timeout, restarting the countdown.
    pub fn reset(&mut self, id: TimerId, timeout_ms: u32) -> Result<()> {
        let slot = self.slot_mut(id)?;
        if slot.in_use {
            slot.remaining_ms = timeout_ms;
            slot.init_ms = timeout_ms;
        }
        Ok(())
    }

    /// Milliseconds until the timer fires; 0 for a free slot.
    pub fn remaining_ms(&self, id: TimerId) -> Result<u32> {
        let slot = self.slots.get(id).ok_or(KernelError::Parameter)?;
        Ok(if slot.in_use { slot.remaining_ms } else { 0 })
    }

    pub fn destroy(&mut self, id: TimerId) -> Result<()> {
        self.slot_mut(id)?.release();
        Ok(())
    }

    /// Whether a timer collected by [`TimerList::tick`] should still fire:
    /// its slot was neither destroyed nor re-created since, and it is not
    /// paused.
    pub fn still_due(&self, due: &Due) -> bool {
        self.slots.get(due.id).is_some_and(|slot| {
            slot.generation == due.generation && !(slot.in_use && slot.paused)
        })
    }

    /// Advance every running timer by one period and collect the callbacks
    /// that are due.
    pub fn tick(&mut self) -> Fired {
        let mut fired = Fired::new();

        for (id, slot) in self.slots.iter_mut().enumerate() {
            if !slot.in_use || slot.paused {
                continue;
            }
            slot.remaining_ms = slot.remaining_ms.saturating_sub(1);
            if slot.remaining_ms > 0 {
                continue;
            }

            if let Some(callback) = slot.callback {
                // At most one entry per slot, so this never overflows
                let _ = fired.push(Due {
                    id,
                    generation: slot.generation,
                    callback,
                    ctx: slot.ctx,
                });
            }
            if slot.auto_restart {
                slot.remaining_ms = slot.init_ms;
            } else {
                // Expiry is not a destroy: the generation stays so the
                // pending callback still runs
                *slot = TimerSlot {
                    generation: slot.generation,
                    ..TimerSlot::FREE
                };
            }
        }

        fired
    }

    fn slot_mut(&mut self, id: TimerId) -> Result<&mut TimerSlot> {
        self.slots.get_mut(id).ok_or(KernelError::Parameter)
    }
}

impl Default for TimerList {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Timer service
// ---------------------------------------------------------------------------

static TIMERS: IrqCell<TimerList> = IrqCell::new(RefCell::new(TimerList::new()));

fn with_timers<R>(f: impl FnOnce(&mut TimerList) -> R) -> R {
    sync::with_cell(&TIMERS, f)
}

/// Free every slot and start the periodic timer interrupt.
///
/// # Returns
/// `Err(HardwareInit)` if the period source cannot be programmed.
pub fn init() -> Result<()> {
    with_timers(TimerList::clear);
    port::arm_timer_source()
}

/// Stop the periodic timer interrupt and free every slot.
pub fn deinit() {
    port::disarm_timer_source();
    with_timers(TimerList::clear);
}

/// Create a timer that calls `callback(ctx)` after `timeout_ms`, and every
/// `timeout_ms` after that if `auto_restart` is set.
///
/// # Returns
/// `Err(ResourceExhausted)` if all `MAX_TIMERS` slots are in use.
pub fn create(
    timeout_ms: u32,
    auto_restart: bool,
    callback: TimerCallback,
    ctx: usize,
) -> Result<TimerId> {
    with_timers(|t| t.create(timeout_ms, auto_restart, callback, ctx))
}

/// Stop the countdown; the remaining time is kept.
pub fn pause(id: TimerId) -> Result<()> {
    with_timers(|t| t.set_paused(id, true))
}

/// Resume a paused countdown.
pub fn restore(id: TimerId) -> Result<()> {
    with_timers(|t| t.set_paused(id, false))
}

pub fn reset(id: TimerId, timeout_ms: u32) -> Result<()> {
    with_timers(|t| t.reset(id, timeout_ms))
}

pub fn remaining_ms(id: TimerId) -> Result<u32> {
    with_timers(|t| t.remaining_ms(id))
}

pub fn destroy(id: TimerId) -> Result<()> {
    with_timers(|t| t.destroy(id))
}

/// One timer period. Called from the timer interrupt.
pub fn service_period() {
    let fired = with_timers(TimerList::tick);
    for due in fired {
        if with_timers(|t| t.still_due(&due)) {
            (due.callback)(due.ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    fn count(ctx: usize) {
        // Safety: tests pass the address of a live AtomicUsize
        let counter = unsafe { &*(ctx as *const AtomicUsize) };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn ctx_of(counter: &AtomicUsize) -> usize {
        counter as *const AtomicUsize as usize
    }

    /// Run `periods` periods on `list`, firing callbacks like the service.
    fn run(list: &mut TimerList, periods: usize) {
        for _ in 0..periods {
            for due in list.tick() {
                (due.callback)(due.ctx);
            }
        }
    }

    #[test]
    fn test_one_shot_fires_once_and_frees_slot() {
        let hits = AtomicUsize::new(0);
        let mut list = TimerList::new();
        let id = list.create(100, false, count, ctx_of(&hits)).unwrap();

        run(&mut list, 99);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(list.remaining_ms(id), Ok(1));

        run(&mut list, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(list.remaining_ms(id), Ok(0));
        assert!(!list.slots[id].in_use);

        run(&mut list, 500);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_auto_restart_fires_until_destroyed() {
        let hits = AtomicUsize::new(0);
        let mut list = TimerList::new();
        let id = list.create(100, true, count, ctx_of(&hits)).unwrap();

        run(&mut list, 100);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(list.remaining_ms(id), Ok(100));

        run(&mut list, 250);
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        list.destroy(id).unwrap();
        run(&mut list, 300);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_zero_timeout_fires_next_period() {
        let hits = AtomicUsize::new(0);
        let mut list = TimerList::new();
        list.create(0, true, count, ctx_of(&hits)).unwrap();

        run(&mut list, 3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_pause_keeps_remaining() {
        let hits = AtomicUsize::new(0);
        let mut list = TimerList::new();
        let id = list.create(10, false, count, ctx_of(&hits)).unwrap();

        run(&mut list, 4);
        list.set_paused(id, true).unwrap();
        run(&mut list, 50);
        assert_eq!(list.remaining_ms(id), Ok(6));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        list.set_paused(id, false).unwrap();
        run(&mut list, 6);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_reloads_both_counts() {
        let hits = AtomicUsize::new(0);
        let mut list = TimerList::new();
        let id = list.create(10, true, count, ctx_of(&hits)).unwrap();

        run(&mut list, 8);
        list.reset(id, 20).unwrap();
        assert_eq!(list.remaining_ms(id), Ok(20));
        run(&mut list, 19);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        run(&mut list, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(list.remaining_ms(id), Ok(20));
    }

    #[test]
    fn test_table_full_and_bad_ids() {
        let mut list = TimerList::new();
        for expected in 0..MAX_TIMERS {
            assert_eq!(list.create(5, false, count, 0), Ok(expected));
        }
        assert_eq!(
            list.create(5, false, count, 0),
            Err(KernelError::ResourceExhausted)
        );

        list.destroy(3).unwrap();
        assert_eq!(list.create(5, false, count, 0), Ok(3));

        assert_eq!(list.remaining_ms(MAX_TIMERS), Err(KernelError::Parameter));
        assert_eq!(list.set_paused(MAX_TIMERS, true), Err(KernelError::Parameter));
        assert_eq!(list.reset(MAX_TIMERS, 1), Err(KernelError::Parameter));
        assert_eq!(list.destroy(MAX_TIMERS), Err(KernelError::Parameter));
    }

    #[test]
    fn test_unused_slot_is_a_no_op() {
        let mut list = TimerList::new();
        assert_eq!(list.set_paused(2, true), Ok(()));
        assert_eq!(list.reset(2, 50), Ok(()));
        assert_eq!(list.destroy(2), Ok(()));
        assert_eq!(list.remaining_ms(2), Ok(0));
        assert!(!list.slots[2].in_use);
    }

    static SERVICE_HITS: AtomicUsize = AtomicUsize::new(0);

    fn rearm(ctx: usize) {
        SERVICE_HITS.fetch_add(1, Ordering::SeqCst);
        // Callbacks run outside the table's critical section
        let _ = reset(ctx, 2);
    }

    #[test]
    fn test_service_runs_callbacks_outside_section() {
        let _g = crate::kernel::test_guard();
        init().unwrap();
        SERVICE_HITS.store(0, Ordering::SeqCst);

        let id = create(1, false, rearm, 0).unwrap();
        assert_eq!(id, 0);
        service_period();
        assert_eq!(SERVICE_HITS.load(Ordering::SeqCst), 1);
        // One-shot was freed before the callback ran; reset is a no-op
        assert_eq!(remaining_ms(id), Ok(0));

        let id = create(3, true, rearm, 0).unwrap();
        service_period();
        assert_eq!(remaining_ms(id), Ok(2));
        pause(id).unwrap();
        service_period();
        assert_eq!(remaining_ms(id), Ok(2));
        restore(id).unwrap();
        service_period();
        service_period();
        assert_eq!(SERVICE_HITS.load(Ordering::SeqCst), 2);
        // Reloaded to 3, then the callback reset it to 2
        assert_eq!(remaining_ms(id), Ok(2));

        deinit();
        assert_eq!(remaining_ms(id), Ok(0));
    }

    static VICTIM_HITS: AtomicUsize = AtomicUsize::new(0);

    fn destroy_victim(victim: usize) {
        let _ = destroy(victim);
    }

    fn victim(_: usize) {
        VICTIM_HITS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_destroyed_by_earlier_callback_does_not_fire() {
        let _g = crate::kernel::test_guard();
        init().unwrap();
        VICTIM_HITS.store(0, Ordering::SeqCst);

        // Both due in the same period; slot 0 runs first
        let a = create(1, false, destroy_victim, 1).unwrap();
        let b = create(1, true, victim, 0).unwrap();
        assert_eq!((a, b), (0, 1));

        service_period();
        assert_eq!(VICTIM_HITS.load(Ordering::SeqCst), 0);
        assert_eq!(remaining_ms(b), Ok(0));

        service_period();
        assert_eq!(VICTIM_HITS.load(Ordering::SeqCst), 0);
        deinit();
    }

    #[test]
    fn test_due_timer_rechecked_before_firing() {
        let mut list = TimerList::new();
        let id = list.create(1, false, count, 7).unwrap();
        let paused = list.create(1, true, count, 8).unwrap();

        let fired = list.tick();
        assert_eq!(fired.len(), 2);
        let (first, second) = (fired[0], fired[1]);
        assert_eq!((first.id, first.ctx), (id, 7));

        // Expired one-shot: slot is free, but its callback is still owed
        assert!(list.still_due(&first));

        // Re-created in the same slot: the old callback is stale
        assert_eq!(list.create(5, false, count, 9), Ok(id));
        assert!(!list.still_due(&first));

        list.set_paused(paused, true).unwrap();
        assert!(!list.still_due(&second));
        list.set_paused(paused, false).unwrap();
        assert!(list.still_due(&second));
        list.destroy(paused).unwrap();
        assert!(!list.still_due(&second));
    }
}
