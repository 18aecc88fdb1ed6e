//! # Initial Stack Frame
//!
//! A task that has never run has no saved context, so one is fabricated on
//! its stack just before its first switch-in. The layout matches exactly
//! what the PendSV handler pops: eight software-saved registers (R4–R11)
//! followed by the eight-word frame the hardware unstacks on exception
//! return.
//!
//! ## Stack Layout (top = high address, growing down)
//!
//! ```text
//! [Hardware stacked frame]
//!   xPSR  (Thumb bit set)
//!   PC    (task trampoline, bit 0 cleared)
//!   LR    (start-error trap, reached only if the trampoline returns)
//!   R12   (0)
//!   R3    (0)
//!   R2    (0)
//!   R1    (0)
//!   R0    (task id → trampoline argument)
//! [Software saved context]
//!   R11 … R4 (0)             <- stack_pointer after init
//! ```
//!
//! This module only writes words; it does not depend on the processor it
//! runs on.

use crate::task::TaskId;

/// Words in a fabricated frame (8 software + 8 hardware).
pub const INITIAL_FRAME_WORDS: usize = 16;

/// Bytes in a fabricated frame.
pub const INITIAL_FRAME_BYTES: usize = INITIAL_FRAME_WORDS * 4;

/// xPSR with only the Thumb state bit set.
pub const INITIAL_XPSR: u32 = 0x0100_0000;

const R0: usize = 8;
const LR: usize = 13;
const PC: usize = 14;
const XPSR: usize = 15;

/// Code addresses every fabricated frame points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEntry {
    /// Where the task starts executing; receives the task id in R0.
    pub trampoline: u32,
    /// Return address planted in LR.
    pub exit: u32,
}

impl FrameEntry {
    pub const NONE: FrameEntry = FrameEntry {
        trampoline: 0,
        exit: 0,
    };
}

/// The register image of a task that has not run yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitialFrame {
    words: [u32; INITIAL_FRAME_WORDS],
}

impl InitialFrame {
    pub fn new(task_id: TaskId, entry: FrameEntry) -> Self {
        let mut words = [0u32; INITIAL_FRAME_WORDS];
        words[R0] = task_id as u32;
        words[LR] = entry.exit;
        // Exception return loads PC verbatim; the Thumb bit lives in xPSR
        words[PC] = entry.trampoline & !1;
        words[XPSR] = INITIAL_XPSR;
        Self { words }
    }

    /// Words from lowest address (R4) to highest (xPSR).
    pub fn words(&self) -> &[u32; INITIAL_FRAME_WORDS] {
        &self.words
    }

    /// Write the frame just below `top` and return the new stack pointer,
    /// which points at the saved R4.
    ///
    /// # Safety
    /// `[top - INITIAL_FRAME_BYTES, top)` must be writable, 4-byte aligned
    /// memory owned by the task.
    pub unsafe fn write_below(&self, top: *mut u32) -> *mut u32 {
        let sp = top.sub(INITIAL_FRAME_WORDS);
        for (i, word) in self.words.iter().enumerate() {
            sp.add(i).write_volatile(*word);
        }
        sp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENTRY: FrameEntry = FrameEntry {
        trampoline: 0x0800_1235,
        exit: 0x0800_2001,
    };

    #[test]
    fn test_frame_layout() {
        let frame = InitialFrame::new(5, ENTRY);
        let w = frame.words();

        assert!(w[..8].iter().all(|&r| r == 0));
        assert_eq!(w[8], 5);
        assert_eq!(&w[9..13], &[0, 0, 0, 0]);
        assert_eq!(w[13], 0x0800_2001);
        assert_eq!(w[14], 0x0800_1234);
        assert_eq!(w[15], INITIAL_XPSR);
    }

    #[test]
    fn test_write_below_top() {
        let mut stack = [0xDEAD_BEEFu32; 24];
        let top = unsafe { stack.as_mut_ptr().add(24) };

        let sp = unsafe { InitialFrame::new(2, ENTRY).write_below(top) };

        assert_eq!(top as usize - sp as usize, INITIAL_FRAME_BYTES);
        // Everything below the frame is untouched
        assert!(stack[..8].iter().all(|&w| w == 0xDEAD_BEEF));
        assert_eq!(stack[8 + 8], 2);
        assert_eq!(stack[23], INITIAL_XPSR);
    }
}
