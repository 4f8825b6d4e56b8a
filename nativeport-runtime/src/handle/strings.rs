//! NUL-terminated text in byte and char handles, and pointer-pointer slots

use super::{AddressHandle, Element, HandleKind};
use crate::error::{Error, Result};
use crate::tracker::{self, AllocationTracker};
use core::ffi::c_void;
use std::sync::Arc;

impl AddressHandle {
    /// Byte handle holding the UTF-8 bytes of `text` and a terminating NUL
    pub fn from_string(text: &str) -> Result<Self> {
        Self::from_string_in(tracker::global(), text)
    }

    pub fn from_string_in(tracker: &Arc<AllocationTracker>, text: &str) -> Result<Self> {
        let mut handle = Self::allocate_in(tracker, HandleKind::Byte, text.len() + 1)?;
        // SAFETY: the allocation holds every byte plus the terminator
        unsafe { handle.put_string(text)? };
        Ok(handle)
    }

    /// Char handle holding the UTF-16 units of `text` and a terminating NUL
    pub fn from_utf16_string(text: &str) -> Result<Self> {
        Self::from_utf16_string_in(tracker::global(), text)
    }

    pub fn from_utf16_string_in(tracker: &Arc<AllocationTracker>, text: &str) -> Result<Self> {
        let units: Vec<u16> = text.encode_utf16().collect();
        let mut handle = Self::allocate_in(tracker, HandleKind::Char, units.len() + 1)?;
        // SAFETY: as above, in 16-bit units
        unsafe { handle.put_terminated(&HandleKind::Char, &units)? };
        Ok(handle)
    }

    /// Text from `position` up to the first NUL.
    ///
    /// Never reads past `limit`, or past `capacity` when no limit is set.
    /// Handles with neither read until the terminator. Invalid UTF-8 is
    /// replaced.
    ///
    /// # Safety
    ///
    /// The bytes up to the bound (or the terminator) must be valid for reads.
    pub unsafe fn get_string(&self) -> Result<String> {
        let bytes = self.get_terminated::<u8>(&HandleKind::Byte)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// UTF-16 variant of [`get_string`](Self::get_string) for char handles
    ///
    /// # Safety
    ///
    /// See [`get_string`](Self::get_string).
    pub unsafe fn get_utf16_string(&self) -> Result<String> {
        let units = self.get_terminated::<u16>(&HandleKind::Char)?;
        Ok(String::from_utf16_lossy(&units))
    }

    /// Write `text` and a NUL at `position`; `limit` then ends before the NUL
    ///
    /// # Safety
    ///
    /// The destination must be valid for writes when `capacity` is unset.
    pub unsafe fn put_string(&mut self, text: &str) -> Result<&mut Self> {
        self.put_terminated(&HandleKind::Byte, text.as_bytes())
    }

    /// UTF-16 variant of [`put_string`](Self::put_string) for char handles
    ///
    /// # Safety
    ///
    /// See [`put_string`](Self::put_string).
    pub unsafe fn put_utf16_string(&mut self, text: &str) -> Result<&mut Self> {
        let units: Vec<u16> = text.encode_utf16().collect();
        self.put_terminated(&HandleKind::Char, &units)
    }

    /// Handle of `kind` at the address stored in slot `index`
    ///
    /// # Safety
    ///
    /// Slot `index` past `position` must be valid for reads.
    pub unsafe fn get_pointer(&self, index: usize, kind: HandleKind) -> Result<AddressHandle> {
        self.require_kind(&HandleKind::PointerPointer)?;
        self.require_address()?;
        let address = self.get::<*mut c_void>(index) as usize;
        Ok(AddressHandle::from_address(kind, address))
    }

    /// Store the address of `target`'s current element in slot `index`
    ///
    /// # Safety
    ///
    /// Slot `index` past `position` must be valid for writes.
    pub unsafe fn put_pointer(&mut self, index: usize, target: &AddressHandle) -> Result<&mut Self> {
        self.require_kind(&HandleKind::PointerPointer)?;
        self.require_address()?;
        let address = if target.is_null() {
            core::ptr::null_mut()
        } else {
            target.cursor() as *mut c_void
        };
        Ok(self.put(index, address))
    }

    fn require_kind(&self, kind: &HandleKind) -> Result<()> {
        if &self.kind == kind {
            Ok(())
        } else {
            Err(Error::KindMismatch {
                expected: kind.to_string(),
                found: self.kind.to_string(),
            })
        }
    }

    unsafe fn get_terminated<E: Element + Default + PartialEq>(&self, kind: &HandleKind) -> Result<Vec<E>> {
        self.require_kind(kind)?;
        self.require_address()?;
        let position = self.raw.position;
        let bound = match (self.raw.limit, self.raw.capacity) {
            (0, 0) => None,
            (0, capacity) => Some(capacity.saturating_sub(position)),
            (limit, _) => Some(
                limit
                    .checked_sub(position)
                    .ok_or(Error::LimitBeforePosition { limit, position })?,
            ),
        };

        let zero = E::default();
        let mut units = Vec::new();
        while bound.map_or(true, |bound| units.len() < bound) {
            let unit = self.get::<E>(units.len());
            if unit == zero {
                break;
            }
            units.push(unit);
        }
        Ok(units)
    }

    unsafe fn put_terminated<E: Element + Default>(&mut self, kind: &HandleKind, units: &[E]) -> Result<&mut Self> {
        self.require_kind(kind)?;
        self.require_address()?;
        let position = self.raw.position;
        let needed = position + units.len() + 1;
        if self.raw.capacity > 0 && needed > self.raw.capacity {
            return Err(Error::CapacityExceeded {
                needed,
                capacity: self.raw.capacity,
            });
        }
        self.put_slice(units)?;
        self.put(units.len(), E::default());
        self.raw.limit = position + units.len();
        Ok(self)
    }
}
