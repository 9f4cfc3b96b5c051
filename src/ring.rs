//! SPSC ring views over the shared memory the kernel and userspace trade
//! frame descriptors through.
//!
//! Each AF_XDP ring is a power-of-two descriptor array plus free-running u32
//! producer and consumer counters, all living in a kernel-provided mmap.
//! Exactly one side of each ring is userspace: we produce on fill and tx and
//! consume on rx and completion, the kernel is always the counterpart. The
//! types here encode that role split — [`ProducerRing`] exposes
//! reserve/write/publish, [`ConsumerRing`] exposes available/get/advance —
//! and keep the descriptor pointer, counters, and index mask private.
//!
//! Memory ordering follows the kernel's protocol: descriptor writes
//! happen-before the Release publication of the producer counter, and
//! descriptor reads happen-after an Acquire observation of it.

use std::sync::atomic::{AtomicU32, Ordering};

/// Kernel `struct xdp_desc`: the unit transferred across the rx and tx
/// rings. Fill and completion rings carry bare `u64` frame offsets instead.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct XdpDesc {
    /// Byte offset of the frame within the UMEM region.
    pub addr: u64,
    /// Number of valid bytes in the frame.
    pub len: u32,
    /// Kernel-internal options field (zero from userspace).
    pub options: u32,
}

const _: () = assert!(core::mem::size_of::<XdpDesc>() == 16);

impl XdpDesc {
    #[inline(always)]
    pub fn new(addr: u64, len: u32) -> Self {
        Self {
            addr,
            len,
            options: 0,
        }
    }
}

/// Raw pointers into one mapped ring. Construction promises the pointers
/// stay valid for the life of the owning ring view.
struct RawRing<T> {
    producer: *mut AtomicU32,
    consumer: *mut AtomicU32,
    desc: *mut T,
    mask: u32,
    size: u32,
}

impl<T: Copy> RawRing<T> {
    /// Safety: all three pointers must be valid for the backing region's
    /// lifetime and `size` must be the ring's power-of-two entry count.
    unsafe fn new(
        producer: *mut AtomicU32,
        consumer: *mut AtomicU32,
        desc: *mut T,
        size: u32,
    ) -> Self {
        debug_assert!(size.is_power_of_two());
        Self {
            producer,
            consumer,
            desc,
            mask: size - 1,
            size,
        }
    }

    #[inline(always)]
    fn load_producer(&self, order: Ordering) -> u32 {
        unsafe { (*self.producer).load(order) }
    }

    #[inline(always)]
    fn load_consumer(&self, order: Ordering) -> u32 {
        unsafe { (*self.consumer).load(order) }
    }

    #[inline(always)]
    fn store_producer(&self, value: u32) {
        unsafe { (*self.producer).store(value, Ordering::Release) }
    }

    #[inline(always)]
    fn store_consumer(&self, value: u32) {
        unsafe { (*self.consumer).store(value, Ordering::Release) }
    }

    #[inline(always)]
    fn write_desc(&self, counter: u32, value: T) {
        unsafe { self.desc.add((counter & self.mask) as usize).write(value) }
    }

    #[inline(always)]
    fn read_desc(&self, counter: u32) -> T {
        unsafe { self.desc.add((counter & self.mask) as usize).read() }
    }
}

/// What keeps a ring's memory alive.
enum Backing<T> {
    /// Kernel mmap; unmapped on drop.
    Kernel { base: *mut libc::c_void, len: usize },
    /// Heap-backed ring shared with a simulated peer (tests only).
    #[cfg(test)]
    Shared(std::sync::Arc<sim::SharedMem<T>>),
    #[cfg(not(test))]
    #[allow(dead_code)]
    Never(core::marker::PhantomData<T>),
}

impl<T> Drop for Backing<T> {
    fn drop(&mut self) {
        if let Backing::Kernel { base, len } = *self {
            unsafe {
                libc::munmap(base, len);
            }
        }
    }
}

/// User-producer ring: fill (`u64`) and tx ([`XdpDesc`]).
pub struct ProducerRing<T: Copy> {
    ring: RawRing<T>,
    /// Head of reserved-but-unpublished slots.
    reserved: u32,
    /// Shadow of the shared producer counter.
    published: u32,
    _backing: Backing<T>,
}

// Confined to the one thread driving its reactor; the kernel counterpart
// synchronizes through the atomics.
unsafe impl<T: Copy + Send> Send for ProducerRing<T> {}

impl<T: Copy> ProducerRing<T> {
    /// Safety: see [`RawRing::new`]; `base`/`map_len` must describe the mmap
    /// holding all three pointers.
    pub(crate) unsafe fn from_kernel_map(
        base: *mut libc::c_void,
        map_len: usize,
        producer: *mut AtomicU32,
        consumer: *mut AtomicU32,
        desc: *mut T,
        size: u32,
    ) -> Self {
        let ring = RawRing::new(producer, consumer, desc, size);
        let current = ring.load_producer(Ordering::Relaxed);
        Self {
            ring,
            reserved: current,
            published: current,
            _backing: Backing::Kernel { base, len: map_len },
        }
    }

    /// Ring capacity in entries.
    #[inline(always)]
    pub fn capacity(&self) -> u32 {
        self.ring.size
    }

    /// Slots still reservable: capacity minus everything reserved and not
    /// yet consumed by the kernel.
    #[inline]
    pub fn free_capacity(&self) -> u32 {
        let consumer = self.ring.load_consumer(Ordering::Acquire);
        self.ring.size - self.reserved.wrapping_sub(consumer)
    }

    /// Reserve `n` slots. Returns the counter value of the first slot, to be
    /// passed (plus `0..n`) to [`Self::write`].
    pub fn reserve(&mut self, n: u32) -> Option<u32> {
        if self.free_capacity() < n {
            return None;
        }
        let start = self.reserved;
        self.reserved = start.wrapping_add(n);
        Some(start)
    }

    /// Fill a reserved slot. `counter` must come from a prior
    /// [`Self::reserve`] and not yet be published.
    #[inline(always)]
    pub fn write(&mut self, counter: u32, value: T) {
        debug_assert!(
            counter.wrapping_sub(self.published) < self.reserved.wrapping_sub(self.published)
        );
        self.ring.write_desc(counter, value);
    }

    /// Publish the next `n` written slots: the descriptor writes are
    /// Release-ordered before the producer counter advance.
    pub fn publish(&mut self, n: u32) {
        debug_assert!(n <= self.reserved.wrapping_sub(self.published));
        self.published = self.published.wrapping_add(n);
        self.ring.store_producer(self.published);
    }

    /// Reserve, write, and publish a single entry. Returns false when the
    /// ring is full; nothing is lost.
    #[inline]
    pub fn push(&mut self, value: T) -> bool {
        match self.reserve(1) {
            Some(counter) => {
                self.write(counter, value);
                self.publish(1);
                true
            }
            None => false,
        }
    }
}

/// User-consumer ring: rx ([`XdpDesc`]) and completion (`u64`).
pub struct ConsumerRing<T: Copy> {
    ring: RawRing<T>,
    /// Shadow of the shared consumer counter.
    consumed: u32,
    _backing: Backing<T>,
}

unsafe impl<T: Copy + Send> Send for ConsumerRing<T> {}

impl<T: Copy> ConsumerRing<T> {
    /// Safety: see [`ProducerRing::from_kernel_map`].
    pub(crate) unsafe fn from_kernel_map(
        base: *mut libc::c_void,
        map_len: usize,
        producer: *mut AtomicU32,
        consumer: *mut AtomicU32,
        desc: *mut T,
        size: u32,
    ) -> Self {
        let ring = RawRing::new(producer, consumer, desc, size);
        let consumed = ring.load_consumer(Ordering::Relaxed);
        Self {
            ring,
            consumed,
            _backing: Backing::Kernel { base, len: map_len },
        }
    }

    #[inline(always)]
    pub fn capacity(&self) -> u32 {
        self.ring.size
    }

    /// Entries the kernel has published and we have not yet advanced past.
    /// The Acquire load orders all subsequent descriptor reads after the
    /// kernel's writes.
    #[inline]
    pub fn available(&self) -> u32 {
        let producer = self.ring.load_producer(Ordering::Acquire);
        producer.wrapping_sub(self.consumed)
    }

    /// Read the entry at `counter`. Only counters in
    /// `position() .. position() + available()` are valid.
    #[inline(always)]
    pub fn get(&self, counter: u32) -> T {
        self.ring.read_desc(counter)
    }

    /// Current consumer counter; the next [`Self::pop`] reads this slot.
    #[inline(always)]
    pub fn position(&self) -> u32 {
        self.consumed
    }

    /// Hand `n` consumed slots back to the kernel.
    pub fn advance(&mut self, n: u32) {
        self.consumed = self.consumed.wrapping_add(n);
        self.ring.store_consumer(self.consumed);
    }

    /// Dequeue one entry, if any.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        if self.available() == 0 {
            return None;
        }
        let value = self.get(self.consumed);
        self.advance(1);
        Some(value)
    }
}


#[cfg(test)]
mod tests {
    use super::sim::spsc_pair;
    use super::*;

    #[test]
    fn published_entries_arrive_in_order() {
        let (mut tx, mut rx) = spsc_pair::<u64>(8);
        for v in [3u64, 1, 4, 1, 5] {
            assert!(tx.push(v));
        }
        assert_eq!(rx.available(), 5);
        let got: Vec<u64> = std::iter::from_fn(|| rx.pop()).collect();
        assert_eq!(got, vec![3, 1, 4, 1, 5]);
        assert_eq!(rx.available(), 0);
    }

    #[test]
    fn reserve_write_publish_batches() {
        let (mut tx, mut rx) = spsc_pair::<u64>(8);
        let start = tx.reserve(3).expect("room for 3");
        for i in 0..3 {
            tx.write(start.wrapping_add(i), 100 + u64::from(i));
        }
        // Nothing is visible until publication.
        assert_eq!(rx.available(), 0);
        tx.publish(3);
        assert_eq!(rx.available(), 3);
        assert_eq!(rx.pop(), Some(100));
        assert_eq!(rx.pop(), Some(101));
        assert_eq!(rx.pop(), Some(102));
    }

    #[test]
    fn full_ring_rejects_and_recovers() {
        let (mut tx, mut rx) = spsc_pair::<u64>(4);
        for v in 0..4u64 {
            assert!(tx.push(v));
        }
        assert_eq!(tx.free_capacity(), 0);
        assert!(!tx.push(99));
        assert!(tx.reserve(1).is_none());

        assert_eq!(rx.pop(), Some(0));
        assert_eq!(tx.free_capacity(), 1);
        assert!(tx.push(99));
        assert!(!tx.push(100));
    }

    #[test]
    fn counters_wrap_without_losing_entries() {
        let (mut tx, mut rx) = spsc_pair::<u64>(4);
        // Many times around a capacity-4 ring.
        for v in 0..64u64 {
            assert!(tx.push(v));
            assert_eq!(rx.pop(), Some(v));
        }
        assert_eq!(rx.available(), 0);
    }

    #[test]
    fn descriptors_round_trip_through_rx_shape() {
        let (mut tx, mut rx) = spsc_pair::<XdpDesc>(8);
        assert!(tx.push(XdpDesc::new(4096, 60)));
        let desc = rx.pop().expect("one descriptor");
        assert_eq!(desc.addr, 4096);
        assert_eq!(desc.len, 60);
        assert_eq!(desc.options, 0);
    }

    #[test]
    fn available_does_not_consume() {
        let (mut tx, mut rx) = spsc_pair::<u64>(8);
        tx.push(7);
        assert_eq!(rx.available(), 1);
        assert_eq!(rx.available(), 1);
        assert_eq!(rx.get(rx.position()), 7);
        assert_eq!(rx.available(), 1);
        rx.advance(1);
        assert_eq!(rx.available(), 0);
    }

    /// Frame offsets are conserved as they cycle fill → rx → fill, the way
    /// they do between the reactor and the kernel.
    #[test]
    fn offsets_are_conserved_across_ring_cycles() {
        const FRAME_SIZE: u64 = 2048;
        const FRAMES: u32 = 16;

        // User produces fill, kernel consumes it; kernel produces rx, user
        // consumes it.
        let (mut fill_user, mut fill_kernel) = spsc_pair::<u64>(FRAMES);
        let (mut rx_kernel, mut rx_user) = spsc_pair::<XdpDesc>(FRAMES);

        let seeded: Vec<u64> = (0..u64::from(FRAMES)).map(|i| i * FRAME_SIZE).collect();
        for &offset in &seeded {
            assert!(fill_user.push(offset));
        }

        // A deterministic burst schedule: the kernel grabs a few fill slots,
        // delivers them as rx descriptors, the user recycles each one.
        let mut in_flight: Vec<u64> = Vec::new();
        for round in 0..200u32 {
            let grab = (round % 5) as usize;
            for _ in 0..grab {
                if let Some(offset) = fill_kernel.pop() {
                    in_flight.push(offset);
                }
            }
            while let Some(offset) = in_flight.pop() {
                assert!(rx_kernel.push(XdpDesc::new(offset, 64)));
            }
            while let Some(desc) = rx_user.pop() {
                assert!(fill_user.push(desc.addr));
            }
        }

        // Drain every location an offset may legally rest in.
        let mut final_offsets: Vec<u64> = Vec::new();
        while let Some(desc) = rx_user.pop() {
            final_offsets.push(desc.addr);
        }
        final_offsets.extend(in_flight.iter().copied());
        while let Some(offset) = fill_kernel.pop() {
            final_offsets.push(offset);
        }

        final_offsets.sort_unstable();
        assert_eq!(final_offsets, seeded, "no offset created or destroyed");
    }
}
