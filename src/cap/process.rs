//! Per-Process Handle Set
//!
//! Owns the handles of one process and maps the values user mode presents
//! back to them.
//!
//! # Security Properties
//! - A value resolves only if the table validates it and this process
//!   owns the handle it names
//! - Duplicate, replace and close of the same value are serialized by the
//!   set's lock, so a duplicate never sees a handle mid-teardown
//! - Handles are deleted after the lock is dropped, since dispatcher
//!   cleanup may re-enter handle operations

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem;

use spin::Mutex;

use super::dispatcher::{Dispatcher, Koid};
use super::handle::HandleOwner;
use super::rights::Rights;
use super::table::HandleTableArena;
use super::HandleError;

type HandleMap<'a> = BTreeMap<u32, HandleOwner<'a>>;

/// The handles held by one process.
pub struct ProcessHandles<'a> {
    koid: Koid,
    table: &'a HandleTableArena,
    handles: Mutex<HandleMap<'a>>,
}

impl<'a> ProcessHandles<'a> {
    /// Create an empty set for the process `koid`.
    pub fn new(table: &'a HandleTableArena, koid: Koid) -> Self {
        Self {
            koid,
            table,
            handles: Mutex::new(BTreeMap::new()),
        }
    }

    /// The owning process.
    #[inline]
    pub fn koid(&self) -> Koid {
        self.koid
    }

    /// Number of handles held.
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    /// Validate `value` and find the handle it names in `map`.
    fn lookup<'m>(&self, map: &'m HandleMap<'a>, value: u32) -> Result<&'m HandleOwner<'a>, HandleError> {
        let handle = self.table.from_u32(value).ok_or(HandleError::BadHandle)?;
        match map.get(&value) {
            Some(owner) if owner.as_ptr() == handle => Ok(owner),
            _ => Err(HandleError::BadHandle),
        }
    }

    /// Take ownership of `owner` for this process.
    fn adopt(&self, map: &mut HandleMap<'a>, owner: HandleOwner<'a>) -> u32 {
        owner.set_process_id(self.koid);
        owner.dispatcher().set_owner(self.koid);
        let value = owner.base_value();
        let previous = map.insert(value, owner);
        assert!(previous.is_none(), "handle {:#x} added twice", value);
        value
    }

    /// Give this process a handle. Returns the value user mode will see.
    ///
    /// # Panics
    /// Panics if `owner` came from a different table.
    pub fn add(&self, owner: HandleOwner<'a>) -> u32 {
        assert!(
            core::ptr::eq(owner.table, self.table),
            "handle {:#x} from a foreign table",
            owner.base_value()
        );
        let mut map = self.handles.lock();
        self.adopt(&mut map, owner)
    }

    /// Take a handle away from this process without deleting it.
    pub fn remove(&self, value: u32) -> Result<HandleOwner<'a>, HandleError> {
        let mut map = self.handles.lock();
        self.lookup(&map, value)?;
        let owner = map.remove(&value).ok_or(HandleError::BadHandle)?;
        owner.set_process_id(Koid::INVALID);
        Ok(owner)
    }

    /// Close a handle.
    pub fn close(&self, value: u32) -> Result<(), HandleError> {
        let owner = self.remove(value)?;
        self.table.delete(owner);
        Ok(())
    }

    /// Duplicate a handle into this process.
    ///
    /// The source must carry [`Rights::DUPLICATE`].
    pub fn duplicate(&self, value: u32, rights: Rights) -> Result<u32, HandleError> {
        let mut map = self.handles.lock();
        let source = self.lookup(&map, value)?;
        if !source.has_rights(Rights::DUPLICATE) {
            return Err(HandleError::AccessDenied);
        }
        let dup = self.table.dup(source, rights)?;
        Ok(self.adopt(&mut map, dup))
    }

    /// Replace a handle with a new one carrying `rights`.
    ///
    /// On success the old value is closed; on failure it stays valid.
    pub fn replace(&self, value: u32, rights: Rights) -> Result<u32, HandleError> {
        let (old, new_value) = {
            let mut map = self.handles.lock();
            let source = self.lookup(&map, value)?;
            let replacement = self.table.dup(source, rights)?;
            let old = map.remove(&value).ok_or(HandleError::BadHandle)?;
            old.set_process_id(Koid::INVALID);
            (old, self.adopt(&mut map, replacement))
        };
        self.table.delete(old);
        Ok(new_value)
    }

    /// Resolve `value` to its dispatcher, checking `required` rights.
    pub fn get_dispatcher_with_rights(
        &self,
        value: u32,
        required: Rights,
    ) -> Result<(Arc<dyn Dispatcher>, Rights), HandleError> {
        let map = self.handles.lock();
        let handle = self.lookup(&map, value)?;
        if !handle.has_rights(required) {
            return Err(HandleError::AccessDenied);
        }
        Ok((Arc::clone(handle.dispatcher()), handle.rights()))
    }

    /// Close every handle, as on process exit.
    pub fn clear(&self) {
        let drained = mem::take(&mut *self.handles.lock());
        let owners: Vec<HandleOwner<'a>> = drained.into_values().collect();
        for owner in owners {
            owner.set_process_id(Koid::INVALID);
            self.table.delete(owner);
        }
    }
}

impl Drop for ProcessHandles<'_> {
    fn drop(&mut self) {
        self.clear();
    }
}
