//! # Byte Ring Buffer
//!
//! Fixed-capacity FIFO of bytes over caller-provided storage. Used to hand
//! data from an interrupt producer (e.g. a UART receive handler) to a task
//! consumer without any allocation.
//!
//! [`RingBuffer`] does no locking of its own. [`IrqRingBuffer`] wraps one
//! in a critical section for the interrupt/task pairing.

use core::cell::RefCell;

use crate::error::{KernelError, Result};
use crate::sync::{self, IrqCell};

/// Byte FIFO over borrowed storage.
///
/// `len` (not cursor equality) tells empty from full, so every byte of the
/// storage is usable.
#[derive(Debug)]
pub struct RingBuffer<'a> {
    storage: Option<&'a mut [u8]>,
    read: usize,
    write: usize,
    len: usize,
}

impl<'a> RingBuffer<'a> {
    /// A buffer with no storage: capacity 0, every put and get moves
    /// nothing.
    pub const fn detached() -> Self {
        Self {
            storage: None,
            read: 0,
            write: 0,
            len: 0,
        }
    }

    /// # Returns
    /// `Err(Parameter)` if `storage` is empty.
    pub fn new(storage: &'a mut [u8]) -> Result<Self> {
        let mut buf = Self::detached();
        buf.init(storage)?;
        Ok(buf)
    }

    /// Move the buffer onto `storage`, emptying it. The previous storage,
    /// if any, is released.
    pub fn init(&mut self, storage: &'a mut [u8]) -> Result<()> {
        if storage.is_empty() {
            return Err(KernelError::Parameter);
        }
        self.storage = Some(storage);
        self.clear();
        Ok(())
    }

    /// Detach and return the storage.
    pub fn destroy(&mut self) -> Option<&'a mut [u8]> {
        self.clear();
        self.storage.take()
    }

    /// Append bytes from `data`.
    ///
    /// When the buffer is full, either stop (`drop_if_full == false`) or
    /// overwrite the oldest byte (`drop_if_full == true`).
    ///
    /// # Returns
    /// Number of bytes of `data` stored.
    pub fn put(&mut self, data: &[u8], drop_if_full: bool) -> usize {
        let Some(storage) = self.storage.as_deref_mut() else {
            return 0;
        };
        let cap = storage.len();

        let mut written = 0;
        for &byte in data {
            if self.len == cap {
                if !drop_if_full {
                    break;
                }
                self.read = (self.read + 1) % cap;
                self.len -= 1;
            }
            storage[self.write] = byte;
            self.write = (self.write + 1) % cap;
            self.len += 1;
            written += 1;
        }
        written
    }

    /// Take up to `out.len()` bytes, oldest first.
    ///
    /// # Returns
    /// Number of bytes copied into `out`.
    pub fn get(&mut self, out: &mut [u8]) -> usize {
        let Some(storage) = self.storage.as_deref() else {
            return 0;
        };
        let cap = storage.len();

        let count = out.len().min(self.len);
        for slot in out[..count].iter_mut() {
            *slot = storage[self.read];
            self.read = (self.read + 1) % cap;
        }
        self.len -= count;
        count
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.as_deref().map_or(0, <[u8]>::len)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Forget the contents. The storage itself is not touched.
    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
        self.len = 0;
    }
}

impl Default for RingBuffer<'_> {
    fn default() -> Self {
        Self::detached()
    }
}

// ---------------------------------------------------------------------------
// Interrupt-shared ring buffer
// ---------------------------------------------------------------------------

/// A [`RingBuffer`] over `'static` storage that both an interrupt handler
/// and tasks may use; every access runs in a critical section.
///
/// ```ignore
/// static RX: IrqRingBuffer = IrqRingBuffer::new();
///
/// // at start-up
/// static mut RX_STORAGE: [u8; 64] = [0; 64];
/// RX.attach(unsafe { &mut *core::ptr::addr_of_mut!(RX_STORAGE) })?;
///
/// // producer (ISR)
/// RX.put(&[byte], true);
/// ```
pub struct IrqRingBuffer {
    inner: IrqCell<RingBuffer<'static>>,
}

impl IrqRingBuffer {
    pub const fn new() -> Self {
        Self {
            inner: IrqCell::new(RefCell::new(RingBuffer::detached())),
        }
    }

    pub fn attach(&self, storage: &'static mut [u8]) -> Result<()> {
        sync::with_cell(&self.inner, |buf| buf.init(storage))
    }

    pub fn put(&self, data: &[u8], drop_if_full: bool) -> usize {
        sync::with_cell(&self.inner, |buf| buf.put(data, drop_if_full))
    }

    pub fn get(&self, out: &mut [u8]) -> usize {
        sync::with_cell(&self.inner, |buf| buf.get(out))
    }

    pub fn len(&self) -> usize {
        sync::with_cell(&self.inner, |buf| buf.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        sync::with_cell(&self.inner, |buf| buf.capacity())
    }

    pub fn clear(&self) {
        sync::with_cell(&self.inner, RingBuffer::clear)
    }
}

impl Default for IrqRingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::boxed::Box;

    #[test]
    fn test_full_buffer_rejects_extra_byte() {
        let mut storage = [0u8; 4];
        let mut rb = RingBuffer::new(&mut storage).unwrap();

        assert_eq!(rb.put(&[1, 2, 3, 4], false), 4);
        assert!(rb.is_full());
        assert_eq!(rb.put(&[5], false), 0);
        assert_eq!(rb.len(), 4);

        let mut out = [0u8; 4];
        assert_eq!(rb.get(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(rb.len(), 0);
        assert!(rb.is_empty());
    }

    #[test]
    fn test_drop_if_full_overwrites_oldest() {
        let mut storage = [0u8; 4];
        let mut rb = RingBuffer::new(&mut storage).unwrap();

        rb.put(&[1, 2, 3, 4], false);
        assert_eq!(rb.put(&[5], true), 1);
        assert_eq!(rb.len(), 4);

        let mut out = [0u8; 8];
        assert_eq!(rb.get(&mut out), 4);
        assert_eq!(&out[..4], &[2, 3, 4, 5]);
    }

    #[test]
    fn test_partial_put_and_wraparound() {
        let mut storage = [0u8; 4];
        let mut rb = RingBuffer::new(&mut storage).unwrap();

        assert_eq!(rb.put(&[1, 2, 3], false), 3);
        let mut out = [0u8; 2];
        assert_eq!(rb.get(&mut out), 2);
        assert_eq!(out, [1, 2]);

        // Wraps past the end of storage; only 3 of 5 fit
        assert_eq!(rb.put(&[4, 5, 6, 7, 8], false), 3);
        let mut out = [0u8; 4];
        assert_eq!(rb.get(&mut out), 4);
        assert_eq!(out, [3, 4, 5, 6]);
        assert_eq!(rb.get(&mut out), 0);
    }

    #[test]
    fn test_clear_and_destroy() {
        let mut storage = [0u8; 4];
        let mut rb = RingBuffer::new(&mut storage).unwrap();
        rb.put(&[9, 9], false);
        rb.clear();
        assert!(rb.is_empty());
        assert_eq!(rb.capacity(), 4);

        let back = rb.destroy().unwrap();
        assert_eq!(back.len(), 4);
        assert_eq!(rb.capacity(), 0);
        assert_eq!(rb.put(&[1], true), 0);
        assert_eq!(rb.get(&mut [0u8; 1]), 0);
    }

    #[test]
    fn test_empty_storage_rejected() {
        let mut storage: [u8; 0] = [];
        assert!(matches!(
            RingBuffer::new(&mut storage),
            Err(KernelError::Parameter)
        ));

        let mut none: [u8; 0] = [];
        let mut some = [0u8; 2];
        let mut rb = RingBuffer::detached();
        assert_eq!(rb.init(&mut none), Err(KernelError::Parameter));
        assert_eq!(rb.init(&mut some), Ok(()));
        assert_eq!(rb.capacity(), 2);
    }

    #[test]
    fn test_irq_ring_buffer_attach() {
        static RX: IrqRingBuffer = IrqRingBuffer::new();
        assert_eq!(RX.capacity(), 0);
        assert_eq!(RX.put(&[1], false), 0);

        let storage: &'static mut [u8] = Box::leak(Box::new([0u8; 3]));
        RX.attach(storage).unwrap();
        assert_eq!(RX.put(&[1, 2, 3, 4], true), 4);
        assert_eq!(RX.len(), 3);

        let mut out = [0u8; 3];
        assert_eq!(RX.get(&mut out), 3);
        assert_eq!(out, [2, 3, 4]);
        assert!(RX.is_empty());
        RX.clear();
    }
}
