//! Slab Arena
//!
//! Fixed-size object pool over a reserved, lazily committed address range.
//! Nothing is taken from the general heap: the free list lives inside the
//! arena's own control pool.
//!
//! # Layout
//! ```text
//! base
//! ┌──────────────────┬────────────┬──────────────────────────┐
//! │ control pool     │ guard page │ data pool                │
//! │ FreeNode x count │ (never     │ object x count           │
//! │                  │ committed) │                          │
//! └──────────────────┴────────────┴──────────────────────────┘
//! ```
//!
//! Both pools are bump allocators that commit pages in fixed increments as
//! the bump pointer advances. Freed objects are recorded by pushing a control
//! node onto an intrusive LIFO list; `alloc` prefers that list, so the most
//! recently freed object is reused first. Only the control pool ever shrinks:
//! once the committed slack above its bump pointer exceeds the decommit
//! threshold, pages are handed back to the VM.

use core::fmt;
use core::mem::size_of;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use super::address::{checked_round_up_pages, round_up_pages, VirtAddr, PAGE_SHIFT, PAGE_SIZE};
use super::vm::{VmError, VmSpace};
use crate::config::ArenaTuning;

/// Error type for arena construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaError {
    /// Zero or oversized object size, zero or overflowing count, or invalid
    /// tuning.
    InvalidArgs,
    /// The address space reservation failed.
    NoMemory(VmError),
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgs => write!(f, "invalid arena arguments"),
            Self::NoMemory(err) => write!(f, "arena reservation failed: {}", err),
        }
    }
}

/// Free-list link, stored in the control pool.
#[repr(C)]
struct FreeNode {
    /// Address of the freed data slot.
    slot: usize,
    /// Next node, or 0.
    next: usize,
}

/// A bump-allocated run of equal-sized slots.
struct Pool {
    start: usize,
    /// End of the last slot that may be handed out.
    end: usize,
    /// Bump pointer.
    top: usize,
    /// End of committed memory; always page-aligned and `>= top`.
    committed: usize,
    /// High-water mark of `committed`.
    committed_max: usize,
    slot_size: usize,
}

impl Pool {
    /// A pool of `bytes / slot_size` slots at `start`.
    ///
    /// `start + bytes` must lie inside the arena's reservation.
    const fn new(start: usize, bytes: usize, slot_size: usize) -> Self {
        Self {
            start,
            end: start + bytes,
            top: start,
            committed: start,
            committed_max: start,
            slot_size,
        }
    }

    /// Last byte the pool may ever commit.
    #[inline]
    fn commit_limit(&self) -> usize {
        round_up_pages(self.end)
    }

    /// Bump-allocate one slot, committing more pages if needed.
    fn pop(&mut self, vm: &dyn VmSpace, tuning: &ArenaTuning, name: &str) -> Option<usize> {
        if self.end - self.top < self.slot_size {
            return None;
        }
        let next_top = self.top + self.slot_size;

        if next_top > self.committed {
            let grow = tuning.commit_pages << PAGE_SHIFT;
            let new_committed = (self.committed + grow).min(self.commit_limit());
            if let Err(err) = vm.commit(VirtAddr::new(self.committed), new_committed - self.committed) {
                log::warn!(
                    target: "arena",
                    "{}: failed to commit {} bytes at {:#x}: {}",
                    name,
                    new_committed - self.committed,
                    self.committed,
                    err
                );
                return None;
            }
            self.committed = new_committed;
            self.committed_max = self.committed_max.max(new_committed);
        }

        let slot = self.top;
        self.top = next_top;
        Some(slot)
    }

    /// Return the most recently popped slot.
    ///
    /// # Panics
    /// Panics if `slot` is not the slot directly below the bump pointer.
    fn push(&mut self, slot: usize, vm: &dyn VmSpace, tuning: &ArenaTuning, name: &str) {
        assert_eq!(
            slot + self.slot_size,
            self.top,
            "{}: pool push out of LIFO order",
            name
        );
        self.top = slot;

        let slack = tuning.decommit_pages << PAGE_SHIFT;
        if self.committed - self.top <= slack {
            return;
        }

        // Keep one growth step above the bump pointer so a following pop
        // does not immediately commit again.
        let keep = (round_up_pages(self.top) + (tuning.commit_pages << PAGE_SHIFT)).min(self.committed);
        match vm.decommit(VirtAddr::new(keep), self.committed - keep) {
            Ok(()) => self.committed = keep,
            Err(err) => log::warn!(
                target: "arena",
                "{}: failed to decommit {} bytes at {:#x}: {}",
                name,
                self.committed - keep,
                keep,
                err
            ),
        }
    }

    /// Whether `addr` is a slot this pool has handed out.
    #[inline]
    fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.top && (addr - self.start) % self.slot_size == 0
    }

    #[inline]
    fn committed_pages(&self) -> usize {
        (self.committed - self.start) >> PAGE_SHIFT
    }

    #[inline]
    fn peak_pages(&self) -> usize {
        (self.committed_max - self.start) >> PAGE_SHIFT
    }
}

/// Mutable arena state, guarded by the arena lock.
struct ArenaState {
    control: Pool,
    data: Pool,
    /// Head of the free list (a control-pool address), or 0.
    free_head: usize,
    free_len: usize,
}

/// An allocated arena slot.
///
/// Slots are move-only: exactly one owner exists until it is handed back to
/// [`SlabArena::free`].
pub struct Slot {
    ptr: NonNull<u8>,
}

// SAFETY: A slot is exclusive ownership of a block of arena memory; the
// arena is shared between threads and accepts frees from any of them.
unsafe impl Send for Slot {}

impl Slot {
    /// Start of the slot's memory.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Start of the slot's memory as an address.
    #[inline]
    pub fn addr(&self) -> VirtAddr {
        VirtAddr::from_ptr(self.ptr.as_ptr())
    }

    /// Give up ownership without freeing.
    #[inline]
    pub fn into_raw(self) -> NonNull<u8> {
        self.ptr
    }

    /// Reclaim ownership of a slot released with [`Slot::into_raw`].
    ///
    /// # Safety
    /// `ptr` must come from `into_raw` on a slot of the arena it will be
    /// freed to, and must not be owned by any other `Slot`.
    #[inline]
    pub unsafe fn from_raw(ptr: NonNull<u8>) -> Self {
        Self { ptr }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({})", self.addr())
    }
}

/// Arena diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    /// Slots currently allocated.
    pub live: usize,
    /// Maximum number of slots.
    pub capacity: usize,
    /// Size of each slot in bytes.
    pub object_size: usize,
    /// Freed slots waiting on the free list.
    pub free_slots: usize,
    /// Committed control-pool pages.
    pub control_pages: usize,
    /// Peak committed control-pool pages.
    pub control_peak_pages: usize,
    /// Committed data-pool pages.
    pub data_pages: usize,
    /// Peak committed data-pool pages.
    pub data_peak_pages: usize,
}

/// Fixed-size object pool over lazily committed virtual memory.
///
/// Slots are `object_size` bytes apart starting at a page boundary, so they
/// are aligned to the largest power of two dividing `object_size`.
pub struct SlabArena {
    name: &'static str,
    vm: &'static dyn VmSpace,
    tuning: ArenaTuning,
    object_size: usize,
    capacity: usize,
    /// Start of the data pool.
    data_start: VirtAddr,
    /// Mirror of the data pool's committed end for lock-free range checks.
    /// The data pool never shrinks, so this only grows.
    data_committed: AtomicUsize,
    live: AtomicUsize,
    state: Mutex<ArenaState>,
}

impl SlabArena {
    /// Reserve an arena of `count` objects of `object_size` bytes with the
    /// default commit tuning.
    pub fn init(
        name: &'static str,
        object_size: usize,
        count: usize,
        vm: &'static dyn VmSpace,
    ) -> Result<Self, ArenaError> {
        Self::init_with_tuning(name, object_size, count, vm, ArenaTuning::DEFAULT)
    }

    /// Reserve an arena with explicit commit/decommit increments.
    ///
    /// No memory is committed until the first allocation.
    pub fn init_with_tuning(
        name: &'static str,
        object_size: usize,
        count: usize,
        vm: &'static dyn VmSpace,
        tuning: ArenaTuning,
    ) -> Result<Self, ArenaError> {
        if object_size == 0 || object_size > PAGE_SIZE || count == 0 || !tuning.is_valid() {
            return Err(ArenaError::InvalidArgs);
        }
        let control_bytes = count
            .checked_mul(size_of::<FreeNode>())
            .ok_or(ArenaError::InvalidArgs)?;
        let data_bytes = count.checked_mul(object_size).ok_or(ArenaError::InvalidArgs)?;

        let control_size = checked_round_up_pages(control_bytes).ok_or(ArenaError::InvalidArgs)?;
        let data_size = checked_round_up_pages(data_bytes).ok_or(ArenaError::InvalidArgs)?;
        let total = control_size
            .checked_add(PAGE_SIZE)
            .and_then(|size| size.checked_add(data_size))
            .ok_or(ArenaError::InvalidArgs)?;

        let base = vm.reserve(name, total).map_err(ArenaError::NoMemory)?;
        if base.as_usize().checked_add(total).is_none() {
            return Err(ArenaError::NoMemory(VmError::InvalidRange));
        }
        let data_start = base.add(control_size + PAGE_SIZE);

        log::debug!(
            target: "arena",
            "{}: reserved {} x {} bytes at {} (data at {})",
            name,
            count,
            object_size,
            base,
            data_start
        );

        Ok(Self {
            name,
            vm,
            tuning,
            object_size,
            capacity: count,
            data_start,
            data_committed: AtomicUsize::new(data_start.as_usize()),
            live: AtomicUsize::new(0),
            state: Mutex::new(ArenaState {
                control: Pool::new(base.as_usize(), control_bytes, size_of::<FreeNode>()),
                data: Pool::new(data_start.as_usize(), data_bytes, object_size),
                free_head: 0,
                free_len: 0,
            }),
        })
    }

    /// Allocate one slot, or `None` if the arena is exhausted.
    pub fn alloc(&self) -> Option<Slot> {
        let mut state = self.state.lock();

        let addr = if state.free_head != 0 {
            let node = state.free_head;
            // SAFETY: Free-list nodes live in committed control-pool memory
            // and are only touched under the arena lock.
            let FreeNode { slot, next } = unsafe { (node as *const FreeNode).read() };
            state.free_head = next;
            state.free_len -= 1;
            // The head node is always the most recently popped control slot.
            state.control.push(node, self.vm, &self.tuning, self.name);
            slot
        } else {
            let slot = state.data.pop(self.vm, &self.tuning, self.name)?;
            self.data_committed.store(state.data.committed, Ordering::Release);
            slot
        };

        self.live.fetch_add(1, Ordering::Relaxed);
        NonNull::new(addr as *mut u8).map(|ptr| Slot { ptr })
    }

    /// Return a slot to the arena.
    ///
    /// The slot's contents are left untouched.
    ///
    /// # Panics
    /// Panics if the slot was not handed out by this arena, or (with debug
    /// assertions) if it is already on the free list.
    pub fn free(&self, slot: Slot) {
        let addr = slot.into_raw().as_ptr() as usize;
        let mut state = self.state.lock();

        assert!(
            state.data.contains(addr),
            "{}: free of foreign address {:#x}",
            self.name,
            addr
        );

        #[cfg(debug_assertions)]
        {
            let mut node = state.free_head;
            while node != 0 {
                // SAFETY: See `alloc`.
                let FreeNode { slot, next } = unsafe { (node as *const FreeNode).read() };
                assert_ne!(slot, addr, "{}: double free of {:#x}", self.name, addr);
                node = next;
            }
        }

        let Some(node) = state.control.pop(self.vm, &self.tuning, self.name) else {
            panic!("{}: control pool exhausted freeing {:#x}", self.name, addr);
        };
        // SAFETY: `node` was just popped from committed control memory and
        // is exclusively ours under the lock.
        unsafe {
            (node as *mut FreeNode).write(FreeNode {
                slot: addr,
                next: state.free_head,
            });
        }
        state.free_head = node;
        state.free_len += 1;
        self.live.fetch_sub(1, Ordering::Relaxed);
    }

    /// Whether `addr` lies in the committed part of the data pool.
    ///
    /// Lock-free; suitable for validating untrusted indices.
    #[inline]
    pub fn committed(&self, addr: VirtAddr) -> bool {
        addr >= self.data_start && addr.as_usize() < self.data_committed.load(Ordering::Acquire)
    }

    /// Arena name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Size of each slot.
    #[inline]
    pub fn object_size(&self) -> usize {
        self.object_size
    }

    /// Maximum number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Address of slot 0.
    #[inline]
    pub fn data_start(&self) -> VirtAddr {
        self.data_start
    }

    /// Number of slots currently allocated.
    #[inline]
    pub fn count(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Snapshot of the arena's commit state.
    pub fn stats(&self) -> ArenaStats {
        let state = self.state.lock();
        ArenaStats {
            live: self.count(),
            capacity: self.capacity,
            object_size: self.object_size,
            free_slots: state.free_len,
            control_pages: state.control.committed_pages(),
            control_peak_pages: state.control.peak_pages(),
            data_pages: state.data.committed_pages(),
            data_peak_pages: state.data.peak_pages(),
        }
    }

    /// Log the arena's commit state.
    pub fn dump(&self) {
        let stats = self.stats();
        log::info!(
            target: "arena",
            "{}: {} / {} slots live, {} bytes each, {} on free list",
            self.name,
            stats.live,
            stats.capacity,
            stats.object_size,
            stats.free_slots
        );
        log::info!(
            target: "arena",
            "{}: control {} pages committed (peak {}), data {} pages committed (peak {})",
            self.name,
            stats.control_pages,
            stats.control_peak_pages,
            stats.data_pages,
            stats.data_peak_pages
        );
    }
}

impl Drop for SlabArena {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for pool in [&state.control, &state.data] {
            if pool.committed > pool.start {
                // Nothing useful can be done if the VM refuses.
                let _ = self
                    .vm
                    .decommit(VirtAddr::new(pool.start), pool.committed - pool.start);
            }
        }
    }
}

impl fmt::Debug for SlabArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlabArena")
            .field("name", &self.name)
            .field("object_size", &self.object_size)
            .field("capacity", &self.capacity)
            .field("live", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::leak_vm;
    use std::collections::HashSet;
    use std::vec::Vec;

    const SMALL: ArenaTuning = ArenaTuning {
        commit_pages: 1,
        decommit_pages: 2,
    };

    #[test]
    fn test_init_rejects_bad_arguments() {
        let vm = leak_vm(16);
        assert_eq!(SlabArena::init("a", 0, 4, vm).err(), Some(ArenaError::InvalidArgs));
        assert_eq!(
            SlabArena::init("a", PAGE_SIZE + 1, 4, vm).err(),
            Some(ArenaError::InvalidArgs)
        );
        assert_eq!(SlabArena::init("a", 64, 0, vm).err(), Some(ArenaError::InvalidArgs));
        let bad = ArenaTuning {
            commit_pages: 2,
            decommit_pages: 2,
        };
        assert_eq!(
            SlabArena::init_with_tuning("a", 64, 4, vm, bad).err(),
            Some(ArenaError::InvalidArgs)
        );
    }

    #[test]
    fn test_init_rejects_oversized_count() {
        let vm = leak_vm(4);
        // Byte counts fit, page rounding does not.
        assert_eq!(
            SlabArena::init("huge", 16, usize::MAX / 16, vm).err(),
            Some(ArenaError::InvalidArgs)
        );
        // Each pool rounds fine, their sum does not.
        assert_eq!(
            SlabArena::init("huge", 16, usize::MAX / 32 + 1, vm).err(),
            Some(ArenaError::InvalidArgs)
        );
        assert_eq!(vm.reserved_pages(), 0);
    }

    #[test]
    fn test_init_reservation_failure() {
        let vm = leak_vm(4);
        assert_eq!(
            SlabArena::init("big", 64, 1024, vm).err(),
            Some(ArenaError::NoMemory(VmError::NoMemory))
        );
    }

    #[test]
    fn test_init_commits_nothing() {
        let vm = leak_vm(16);
        let arena = SlabArena::init("lazy", 64, 4, vm).unwrap();
        assert_eq!(vm.committed_pages(), 0);
        assert!(!arena.committed(arena.data_start()));
    }

    #[test]
    fn test_four_slots_then_exhaustion() {
        let vm = leak_vm(16);
        let arena = SlabArena::init("four", 64, 4, vm).unwrap();

        let slots: Vec<Slot> = (0..4).map(|_| arena.alloc().expect("alloc")).collect();
        let addrs: HashSet<usize> = slots.iter().map(|s| s.addr().as_usize()).collect();
        assert_eq!(addrs.len(), 4);
        assert!(arena.alloc().is_none());

        let mut slots = slots.into_iter();
        let first = slots.next().unwrap();
        let second = slots.next().unwrap();
        let second_addr = second.addr();
        arena.free(second);

        let again = arena.alloc().expect("realloc");
        assert_eq!(again.addr(), second_addr);
        assert!(arena.alloc().is_none());

        arena.free(again);
        arena.free(first);
        for slot in slots {
            arena.free(slot);
        }
        assert_eq!(arena.count(), 0);
    }

    #[test]
    fn test_lifo_reuse() {
        let vm = leak_vm(16);
        let arena = SlabArena::init("lifo", 32, 16, vm).unwrap();
        let a = arena.alloc().unwrap();
        let b = arena.alloc().unwrap();
        let (a_addr, b_addr) = (a.addr(), b.addr());

        arena.free(a);
        arena.free(b);
        assert_eq!(arena.alloc().unwrap().addr(), b_addr);
        assert_eq!(arena.alloc().unwrap().addr(), a_addr);
    }

    #[test]
    fn test_guard_page_stays_uncommitted() {
        let vm = leak_vm(16);
        let arena = SlabArena::init("guard", 64, 64, vm).unwrap();
        let slot = arena.alloc().unwrap();
        arena.free(slot);

        assert!(vm.is_committed(arena.data_start()));
        assert!(!vm.is_committed(VirtAddr::new(arena.data_start().as_usize() - PAGE_SIZE)));
    }

    #[test]
    fn test_no_aliasing_under_interleaving() {
        let vm = leak_vm(64);
        let arena = SlabArena::init_with_tuning("mix", 48, 512, vm, SMALL).unwrap();
        let mut live: Vec<Slot> = Vec::new();
        let mut addrs: HashSet<usize> = HashSet::new();
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;

        for _ in 0..20_000 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            if (seed >> 33) % 3 != 0 {
                if let Some(slot) = arena.alloc() {
                    assert!(addrs.insert(slot.addr().as_usize()), "slot handed out twice");
                    assert!(arena.committed(slot.addr()));
                    live.push(slot);
                } else {
                    assert_eq!(live.len(), 512);
                }
            } else if !live.is_empty() {
                let idx = (seed >> 17) as usize % live.len();
                let slot = live.swap_remove(idx);
                addrs.remove(&slot.addr().as_usize());
                arena.free(slot);
            }
        }
        assert_eq!(arena.count(), live.len());
    }

    #[test]
    fn test_control_pool_hysteresis() {
        // 2048 x 16-byte nodes and objects: 8 pages per pool.
        let vm = leak_vm(24);
        let arena = SlabArena::init_with_tuning("shrink", 16, 2048, vm, SMALL).unwrap();

        let mut slots: Vec<Slot> = (0..2048).map(|_| arena.alloc().unwrap()).collect();
        assert_eq!(arena.stats().data_pages, 8);

        for slot in slots.drain(..) {
            arena.free(slot);
        }
        let stats = arena.stats();
        assert_eq!(stats.control_pages, 8);
        assert_eq!(stats.free_slots, 2048);

        // Half the free nodes go back: 4 pages of nodes remain live.
        slots.extend((0..1024).map(|_| arena.alloc().unwrap()));
        let stats = arena.stats();
        assert!(stats.control_pages >= 4);
        assert!(stats.control_pages <= 4 + SMALL.decommit_pages);
        assert_eq!(stats.control_peak_pages, 8);
        assert_eq!(stats.data_pages, 8);
        assert_eq!(vm.committed_pages(), stats.control_pages + stats.data_pages);

        // The remaining nodes are still readable and point at distinct slots.
        slots.extend((0..1024).map(|_| arena.alloc().unwrap()));
        let addrs: HashSet<usize> = slots.iter().map(|s| s.addr().as_usize()).collect();
        assert_eq!(addrs.len(), 2048);
        for slot in &slots {
            assert!(vm.is_committed(slot.addr()));
        }
        assert!(arena.stats().control_pages <= SMALL.decommit_pages);
    }

    #[test]
    #[should_panic(expected = "foreign address")]
    fn test_free_foreign_address_is_fatal() {
        let vm = leak_vm(16);
        let arena = SlabArena::init("foreign", 64, 4, vm).unwrap();
        let _slot = arena.alloc().unwrap();
        let mut local = 0u64;
        // SAFETY: deliberately bogus; the arena must reject it before use
        let bogus = unsafe { Slot::from_raw(NonNull::from(&mut local).cast()) };
        arena.free(bogus);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "double free")]
    fn test_double_free_is_fatal() {
        let vm = leak_vm(16);
        let arena = SlabArena::init("double", 64, 4, vm).unwrap();
        let slot = arena.alloc().unwrap();
        let raw = slot.into_raw();
        // SAFETY: deliberately duplicated to provoke the check
        arena.free(unsafe { Slot::from_raw(raw) });
        arena.free(unsafe { Slot::from_raw(raw) });
    }

    #[test]
    fn test_concurrent_alloc_free() {
        let vm = leak_vm(64);
        let arena = SlabArena::init_with_tuning("smp", 16, 4096, vm, SMALL).unwrap();

        std::thread::scope(|scope| {
            for thread in 0..4u64 {
                let arena = &arena;
                scope.spawn(move || {
                    let mut held = Vec::new();
                    for round in 0..500u64 {
                        for i in 0..8u64 {
                            let slot = arena.alloc().expect("capacity");
                            let stamp = (thread << 48) | (round << 8) | i;
                            // SAFETY: the slot is exclusively ours and 16 bytes
                            unsafe { slot.as_ptr().cast::<u64>().write(stamp) };
                            held.push((slot, stamp));
                        }
                        for (slot, stamp) in held.drain(..) {
                            // SAFETY: as above
                            let seen = unsafe { slot.as_ptr().cast::<u64>().read() };
                            assert_eq!(seen, stamp, "slot shared between owners");
                            arena.free(slot);
                        }
                    }
                });
            }
        });

        assert_eq!(arena.count(), 0);
    }

    #[test]
    fn test_drop_releases_pages() {
        let vm = leak_vm(16);
        {
            let arena = SlabArena::init("drop", 64, 64, vm).unwrap();
            let slot = arena.alloc().unwrap();
            arena.free(slot);
            assert!(vm.committed_pages() > 0);
            arena.dump();
        }
        assert_eq!(vm.committed_pages(), 0);
    }
}
