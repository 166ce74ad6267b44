//! Handles
//!
//! A [`Handle`] is the kernel-side record behind one user-visible handle
//! value. Handles never live on the heap: each one is constructed in place
//! inside a [`HandleSlot`] of the kernel-wide handle table and destroyed in
//! place when the last owner lets go of it.

use alloc::sync::Arc;
use core::cell::UnsafeCell;
use core::fmt;
use core::mem::MaybeUninit;
use core::ops::Deref;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use super::dispatcher::{Dispatcher, Koid};
use super::rights::Rights;
use super::table::HandleTableArena;

/// One user-visible capability.
pub struct Handle {
    dispatcher: Arc<dyn Dispatcher>,
    rights: Rights,
    /// Koid of the owning process, or [`Koid::INVALID`].
    process_id: AtomicU64,
    base_value: u32,
}

impl Handle {
    pub(crate) fn new(dispatcher: Arc<dyn Dispatcher>, rights: Rights, base_value: u32) -> Self {
        Self {
            dispatcher,
            rights,
            process_id: AtomicU64::new(Koid::INVALID.as_u64()),
            base_value,
        }
    }

    /// The object this handle refers to.
    #[inline]
    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    #[inline]
    pub fn rights(&self) -> Rights {
        self.rights
    }

    /// Check that the handle carries every right in `desired`.
    #[inline]
    pub fn has_rights(&self, desired: Rights) -> bool {
        self.rights.contains(desired)
    }

    /// The token minted for this handle; the value user mode sees.
    #[inline]
    pub fn base_value(&self) -> u32 {
        self.base_value
    }

    /// The owning process.
    #[inline]
    pub fn process_id(&self) -> Koid {
        Koid::from_raw(self.process_id.load(Ordering::Acquire))
    }

    /// Record (or with [`Koid::INVALID`], clear) the owning process.
    ///
    /// The owner must clear this before the handle is deleted.
    #[inline]
    pub fn set_process_id(&self, koid: Koid) {
        self.process_id.store(koid.as_u64(), Ordering::Release);
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("value", &format_args!("{:#x}", self.base_value))
            .field("koid", &self.dispatcher.koid().as_u64())
            .field("rights", &self.rights)
            .field("process", &self.process_id().as_u64())
            .finish()
    }
}

/// Storage for one handle in the table arena.
///
/// `token` outlives the handle: after teardown it keeps the last value
/// (marked retired) so the next occupant can pick a new generation.
#[repr(C)]
pub(crate) struct HandleSlot {
    pub(crate) token: AtomicU32,
    body: UnsafeCell<MaybeUninit<Handle>>,
}

impl HandleSlot {
    /// Pointer to the handle body of `slot`.
    #[inline]
    pub(crate) fn handle_ptr(slot: NonNull<HandleSlot>) -> NonNull<Handle> {
        // SAFETY: `body` is a field of a valid slot; UnsafeCell and
        // MaybeUninit are layout-transparent over `Handle`.
        unsafe { NonNull::new_unchecked(slot.as_ref().body.get().cast::<Handle>()) }
    }

    /// Write a new handle into an empty slot, then publish its token.
    ///
    /// # Safety
    /// The slot must be exclusively owned and hold no live handle.
    pub(crate) unsafe fn construct(slot: NonNull<HandleSlot>, handle: Handle) {
        let token = handle.base_value;
        // SAFETY: guaranteed by the caller.
        unsafe {
            Self::handle_ptr(slot).as_ptr().write(handle);
            slot.as_ref().token.store(token, Ordering::Release);
        }
    }
}

/// Exclusive owner of a live handle.
///
/// Dropping the owner deletes the handle through the table it came from.
pub struct HandleOwner<'a> {
    pub(crate) table: &'a HandleTableArena,
    pub(crate) slot: NonNull<HandleSlot>,
}

// SAFETY: The owner is the only path to a live handle's slot; `Handle` is
// itself Send + Sync and the table accepts deletes from any thread.
unsafe impl Send for HandleOwner<'_> {}
unsafe impl Sync for HandleOwner<'_> {}

impl HandleOwner<'_> {
    /// Address of the owned handle, as returned by
    /// [`HandleTableArena::from_u32`].
    #[inline]
    pub fn as_ptr(&self) -> NonNull<Handle> {
        HandleSlot::handle_ptr(self.slot)
    }
}

impl Deref for HandleOwner<'_> {
    type Target = Handle;

    #[inline]
    fn deref(&self) -> &Handle {
        // SAFETY: the slot holds a live handle for as long as its owner exists.
        unsafe { self.as_ptr().as_ref() }
    }
}

impl Drop for HandleOwner<'_> {
    fn drop(&mut self) {
        // SAFETY: we are the unique owner and never touch the slot again.
        unsafe { self.table.delete_slot(self.slot) };
    }
}

impl fmt::Debug for HandleOwner<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
