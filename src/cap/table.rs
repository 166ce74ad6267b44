//! Handle Table
//!
//! The kernel-wide pool of [`Handle`]s. Every handle value user mode holds
//! names a slot in this table, and every syscall taking a handle resolves it
//! through [`HandleTableArena::from_u32`].
//!
//! # Security Model
//! - Handle values are generation-tagged: a value for a freed slot stops
//!   validating the moment the handle is torn down, and the slot's next
//!   occupant is issued a different generation
//! - Validation compares the full 32-bit value with a data-dependent select,
//!   so a mispredicted branch cannot reveal whether a guess was close
//! - The table never dereferences a handle on behalf of a lookup; callers
//!   confirm ownership through their own per-process set

use alloc::sync::Arc;
use core::hint::black_box;
use core::mem::size_of;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicUsize, Ordering};

use super::dispatcher::Dispatcher;
use super::handle::{Handle, HandleOwner, HandleSlot};
use super::rights::Rights;
use super::token::{TokenLayout, RETIRED_BIT};
use super::HandleError;
use crate::config::HandleTableConfig;
use crate::mm::{SlabArena, Slot, VirtAddr, VmSpace};

const LOG_TARGET: &str = "handles";

/// Generation-tagged table of handles.
pub struct HandleTableArena {
    arena: SlabArena,
    layout: TokenLayout,
    high_water_mark: usize,
    outstanding: AtomicUsize,
}

impl HandleTableArena {
    /// Reserve the table. Nothing is committed until the first handle.
    ///
    /// Fails with [`HandleError::InvalidArgs`] if the capacity does not
    /// yield a usable token layout.
    pub fn init(vm: &'static dyn VmSpace, config: HandleTableConfig) -> Result<Self, HandleError> {
        let layout = TokenLayout::for_capacity(config.capacity).ok_or(HandleError::InvalidArgs)?;
        let arena = SlabArena::init_with_tuning(
            "handles",
            size_of::<HandleSlot>(),
            config.capacity,
            vm,
            config.tuning,
        )
        .map_err(HandleError::Arena)?;

        log::debug!(
            target: LOG_TARGET,
            "handle table: {} slots, {} index bits, {} generation bits",
            config.capacity,
            layout.index_bits(),
            layout.generation_bits()
        );

        Ok(Self {
            arena,
            layout,
            high_water_mark: config.high_water_mark,
            outstanding: AtomicUsize::new(0),
        })
    }

    /// Token bit split used by this table.
    #[inline]
    pub fn layout(&self) -> TokenLayout {
        self.layout
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    /// Number of live handles.
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    /// Slot index of the slot at `addr`.
    #[inline]
    fn index_of(&self, addr: VirtAddr) -> usize {
        addr.offset_from(self.arena.data_start()) / size_of::<HandleSlot>()
    }

    /// Mint the token for a freshly allocated slot from whatever token its
    /// previous occupant left behind.
    fn get_new_base_value(&self, slot: &Slot) -> u32 {
        let addr = slot.addr();
        // SAFETY: the slot is allocated and committed; its token word is
        // zero-filled on first use and retired by teardown afterwards.
        let stale = unsafe { (*addr.as_ptr::<HandleSlot>()).token.load(Ordering::Acquire) };
        assert!(
            stale == 0 || stale & RETIRED_BIT != 0,
            "handle slot {} reused before teardown (token {:#x})",
            addr,
            stale
        );
        self.layout.next_token(self.index_of(addr), stale)
    }

    /// Take a slot for a new handle to `dispatcher` and mint its token.
    fn alloc(&self, dispatcher: &Arc<dyn Dispatcher>, reason: &str) -> Result<(Slot, u32), HandleError> {
        let Some(slot) = self.arena.alloc() else {
            log::warn!(
                target: LOG_TARGET,
                "could not allocate {} handle ({} outstanding)",
                reason,
                self.outstanding()
            );
            return Err(HandleError::NoResources);
        };

        let outstanding = self.outstanding.fetch_add(1, Ordering::Relaxed) + 1;
        if outstanding == self.high_water_mark + 1 {
            log::warn!(
                target: LOG_TARGET,
                "high handle count: {} / {} handles",
                outstanding,
                self.capacity()
            );
        }

        dispatcher.base().increment_handle_count();
        let token = self.get_new_base_value(&slot);
        Ok((slot, token))
    }

    fn construct(&self, slot: Slot, handle: Handle) -> HandleOwner<'_> {
        let slot = slot.into_raw().cast::<HandleSlot>();
        // SAFETY: the slot was just handed out by the arena and holds no
        // live handle.
        unsafe { HandleSlot::construct(slot, handle) };
        HandleOwner { table: self, slot }
    }

    /// Create the first handle to a dispatcher.
    pub fn make(&self, dispatcher: Arc<dyn Dispatcher>, rights: Rights) -> Result<HandleOwner<'_>, HandleError> {
        if rights.contains(Rights::SAME_RIGHTS) {
            return Err(HandleError::InvalidArgs);
        }
        let (slot, token) = self.alloc(&dispatcher, "new")?;
        Ok(self.construct(slot, Handle::new(dispatcher, rights, token)))
    }

    /// Create another handle to `source`'s dispatcher.
    ///
    /// `rights` must be a subset of the source's rights, or
    /// [`Rights::SAME_RIGHTS`].
    pub fn dup(&self, source: &Handle, rights: Rights) -> Result<HandleOwner<'_>, HandleError> {
        let rights = rights
            .resolve_against(source.rights())
            .ok_or(HandleError::InvalidArgs)?;
        let dispatcher = Arc::clone(source.dispatcher());
        let (slot, token) = self.alloc(&dispatcher, "duplicate")?;
        Ok(self.construct(slot, Handle::new(dispatcher, rights, token)))
    }

    /// Delete a handle.
    ///
    /// # Panics
    /// Panics if `owner` belongs to another table, or if its owning process
    /// id is still set.
    pub fn delete(&self, owner: HandleOwner<'_>) {
        assert!(
            ptr::eq(owner.table, self),
            "handle {:#x} deleted through a foreign table",
            owner.base_value()
        );
        drop(owner);
    }

    /// Cancel waits, tear down, release the slot, then notify the dispatcher.
    ///
    /// # Safety
    /// `slot` must hold a live handle from this table, and the caller must
    /// be its unique owner.
    pub(crate) unsafe fn delete_slot(&self, slot: NonNull<HandleSlot>) {
        let dispatcher = {
            // SAFETY: the handle is live until `tear_down`.
            let handle = unsafe { HandleSlot::handle_ptr(slot).as_ref() };
            let dispatcher = Arc::clone(handle.dispatcher());
            if dispatcher.is_waitable() {
                dispatcher.cancel(handle);
            }
            dispatcher
        };

        // SAFETY: guaranteed by the caller.
        unsafe { self.tear_down(slot) };

        let zero_handles = dispatcher.base().decrement_handle_count();
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        // SAFETY: the slot came from `self.arena` and is no longer referenced.
        self.arena.free(unsafe { Slot::from_raw(slot.cast()) });

        if zero_handles {
            dispatcher.on_zero_handles();
        }
        // The last dispatcher reference may go here, with no lock held.
        drop(dispatcher);
    }

    /// Retire the slot's token and destroy the handle in place.
    ///
    /// # Safety
    /// `slot` must hold a live handle that nothing else will touch.
    unsafe fn tear_down(&self, slot: NonNull<HandleSlot>) {
        let handle_ptr = HandleSlot::handle_ptr(slot);
        // SAFETY: the handle is live.
        let handle = unsafe { handle_ptr.as_ref() };
        let owner = handle.process_id();
        assert!(
            !owner.is_valid(),
            "handle {:#x} torn down while owned by process {}",
            handle.base_value(),
            owner.as_u64()
        );

        // SAFETY: the slot stays allocated until we free it.
        let token = unsafe { &slot.as_ref().token };
        token.store(handle.base_value() | RETIRED_BIT, Ordering::Release);
        // SAFETY: the handle is live and unique; the token stays behind.
        unsafe { ptr::drop_in_place(handle_ptr.as_ptr()) };
    }

    /// Resolve a user-supplied handle value.
    ///
    /// Returns the handle's address if `value` is exactly the token of a live
    /// handle. The result may be dereferenced only by a caller that can
    /// show the handle is still live, such as the owning process's handle
    /// set holding its lock.
    pub fn from_u32(&self, value: u32) -> Option<NonNull<Handle>> {
        let index = self.layout.index(value);
        let addr = self.arena.data_start().add(index * size_of::<HandleSlot>());
        if !self.arena.committed(addr) {
            return None;
        }

        let slot = addr.as_ptr::<HandleSlot>();
        // SAFETY: every committed slot address holds an initialized token word.
        let stored = unsafe { (*slot).token.load(Ordering::Acquire) };
        let diff = (stored ^ value)
            | (value & self.layout.reserved_mask())
            | (self.layout.generation(value) == 0) as u32;

        let handle = HandleSlot::handle_ptr(NonNull::new(slot as *mut HandleSlot)?);
        let selected = select_if_zero(diff, handle.as_ptr() as usize, 0);
        NonNull::new(selected as *mut Handle)
    }

    /// Live handles to `dispatcher`.
    #[inline]
    pub fn handle_count(&self, dispatcher: &dyn Dispatcher) -> u32 {
        dispatcher.base().current_handle_count()
    }

    /// Log table occupancy and the arena's commit state.
    pub fn dump(&self) {
        log::info!(
            target: LOG_TARGET,
            "handle table: {} / {} handles outstanding (warn above {})",
            self.outstanding(),
            self.capacity(),
            self.high_water_mark
        );
        self.arena.dump();
    }
}

/// `a` if `diff` is zero, else `b`, without a branch on `diff`.
#[inline(always)]
fn select_if_zero(diff: u32, a: usize, b: usize) -> usize {
    let diff = black_box(diff) as usize;
    // All ones when diff == 0, all zeros otherwise.
    let mask = ((diff | diff.wrapping_neg()) >> (usize::BITS - 1)).wrapping_sub(1);
    (a & mask) | (b & !mask)
}
