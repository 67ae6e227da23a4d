// Packet buffer handle.
//
// Layout of one buffer:
//   [ headroom | data (data_len) | tailroom ]
//   ^ 0        ^ data_off

use std::mem::ManuallyDrop;

use super::pktmbuf::{MBUF_HEADROOM, MemPool, Slot};

/// A single packet buffer drawn from a [`MemPool`].
///
/// `Mbuf` is move-only: exactly one holder owns a buffer at any time. It
/// returns to its pool when dropped, or explicitly through [`Mbuf::free`].
pub struct Mbuf {
    slot: ManuallyDrop<Slot>,
    pool: ManuallyDrop<MemPool>,
    data_off: u16,
    data_len: u16,
}

impl Mbuf {
    pub(crate) fn from_slot(slot: Slot, pool: MemPool) -> Self {
        pool.mark_in_use();
        let data_off = MBUF_HEADROOM.min(slot.buf.len()) as u16;
        Mbuf {
            slot: ManuallyDrop::new(slot),
            pool: ManuallyDrop::new(pool),
            data_off,
            data_len: 0,
        }
    }

    /// Give up the handle without returning the slot to the shared ring.
    pub(crate) fn into_slot(self) -> Slot {
        let mut me = ManuallyDrop::new(self);
        // SAFETY: `me` is never dropped, and each field is taken exactly once.
        let (slot, pool) = unsafe {
            (
                ManuallyDrop::take(&mut me.slot),
                ManuallyDrop::take(&mut me.pool),
            )
        };
        pool.mark_released();
        slot
    }

    /// Allocate a new mbuf from the given mempool.
    ///
    /// Returns `None` if allocation fails (pool exhausted).
    #[inline]
    pub fn alloc(mempool: &MemPool) -> Option<Self> {
        mempool.try_alloc()
    }

    /// Index of the underlying buffer within its pool.
    #[inline]
    pub fn id(&self) -> u32 {
        self.slot.id
    }

    /// The pool this buffer returns to.
    #[inline]
    pub fn pool(&self) -> &MemPool {
        &self.pool
    }

    /// Return the buffer to its pool.
    #[inline]
    pub fn free(self) {
        drop(self);
    }

    /// Get the current data length (bytes of valid data).
    #[inline]
    pub fn data_len(&self) -> usize {
        self.data_len as usize
    }

    /// Get the total packet length. Buffers are never chained, so this is
    /// the data length.
    #[inline]
    pub fn pkt_len(&self) -> usize {
        self.data_len as usize
    }

    #[inline]
    pub fn headroom(&self) -> usize {
        self.data_off as usize
    }

    #[inline]
    pub fn tailroom(&self) -> usize {
        self.slot.buf.len() - self.data_off as usize - self.data_len as usize
    }

    /// Get the total capacity (data_len + tailroom).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data_len() + self.tailroom()
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        let start = self.data_off as usize;
        &self.slot.buf[start..start + self.data_len as usize]
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        let start = self.data_off as usize;
        let end = start + self.data_len as usize;
        &mut self.slot.buf[start..end]
    }

    /// Append space to the end of the packet data.
    ///
    /// Returns a mutable slice to the newly appended region,
    /// or `None` if there's not enough tailroom.
    #[inline]
    pub fn append(&mut self, len: usize) -> Option<&mut [u8]> {
        if len > self.tailroom() {
            return None;
        }
        let start = self.data_off as usize + self.data_len as usize;
        self.data_len += len as u16;
        Some(&mut self.slot.buf[start..start + len])
    }

    /// Prepend space to the front of the packet data.
    ///
    /// Returns a mutable slice to the newly prepended region,
    /// or `None` if there's not enough headroom.
    #[inline]
    pub fn prepend(&mut self, len: usize) -> Option<&mut [u8]> {
        if len > self.headroom() {
            return None;
        }
        self.data_off -= len as u16;
        self.data_len += len as u16;
        let start = self.data_off as usize;
        Some(&mut self.slot.buf[start..start + len])
    }

    /// Remove bytes from the beginning of the packet data.
    ///
    /// Returns `false` if len > data_len.
    #[inline]
    pub fn adj(&mut self, len: usize) -> bool {
        if len > self.data_len() {
            return false;
        }
        self.data_off += len as u16;
        self.data_len -= len as u16;
        true
    }

    /// Remove bytes from the end of the packet data.
    ///
    /// Returns `true` on success, `false` if len > data_len.
    #[inline]
    pub fn trim(&mut self, len: usize) -> bool {
        if len > self.data_len() {
            return false;
        }
        self.data_len -= len as u16;
        true
    }

    /// Reset the mbuf to its initial state (empty, with default headroom).
    #[inline]
    pub fn reset(&mut self) {
        self.data_off = MBUF_HEADROOM.min(self.slot.buf.len()) as u16;
        self.data_len = 0;
    }

    /// Copy data from a slice, resetting the mbuf first.
    pub fn copy_from_slice(&mut self, data: &[u8]) -> bool {
        self.reset();
        if let Some(buf) = self.append(data.len()) {
            buf.copy_from_slice(data);
            true
        } else {
            false
        }
    }
}

impl Drop for Mbuf {
    fn drop(&mut self) {
        // SAFETY: drop runs once; neither field is touched afterwards.
        let (slot, pool) = unsafe {
            (
                ManuallyDrop::take(&mut self.slot),
                ManuallyDrop::take(&mut self.pool),
            )
        };
        pool.mark_released();
        pool.put_free(slot);
    }
}

impl AsRef<[u8]> for Mbuf {
    fn as_ref(&self) -> &[u8] {
        self.data()
    }
}

impl AsMut<[u8]> for Mbuf {
    fn as_mut(&mut self) -> &mut [u8] {
        self.data_mut()
    }
}

impl std::fmt::Debug for Mbuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mbuf")
            .field("id", &self.id())
            .field("data_len", &self.data_len())
            .field("headroom", &self.headroom())
            .field("tailroom", &self.tailroom())
            .finish()
    }
}
