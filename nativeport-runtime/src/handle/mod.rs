//! Address handles - a managed view onto native memory
//!
//! Design:
//! - `RawHandle` (address/position/limit/capacity) is the first field of a
//!   `#[repr(C)]` handle, so generated code reads it through `np_handle*`.
//! - Ownership of the allocation lives in a shared release cell. Views made
//!   with `from_handle` share it: an explicit deallocate through any view
//!   frees once, dropping views only decrements.
//! - Element access is raw and unchecked, like the native memory it wraps.

mod element;
mod kind;
mod native;
mod release;
mod strings;

#[cfg(test)]
mod tests;

pub use element::Element;
pub use kind::HandleKind;
pub use native::{calloc, free, malloc, memchr, memcmp, memcpy, memmove, memset, realloc};
pub use release::{BufferDeallocator, Deallocator, FreeDeallocator, NativeDeallocator};

pub(crate) use release::ReleaseCell;

use crate::error::{Error, Result};
use crate::logging::log_allocation;
use crate::offsets;
use crate::scope;
use crate::tracker::{self, AllocationTracker};
use core::ffi::c_void;
use std::sync::Arc;
use tracing::debug;

/// Address and slicing fields shared with generated code
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawHandle {
    pub address: usize,
    pub position: usize,
    pub limit: usize,
    pub capacity: usize,
}

#[repr(C)]
pub struct AddressHandle {
    raw: RawHandle,
    kind: HandleKind,
    release: Option<Arc<ReleaseCell>>,
}

impl AddressHandle {
    /// A null handle of the given kind
    pub fn null(kind: HandleKind) -> Self {
        Self {
            raw: RawHandle::default(),
            kind,
            release: None,
        }
    }

    /// Wrap an address the caller keeps ownership of
    pub fn from_address(kind: HandleKind, address: usize) -> Self {
        Self {
            raw: RawHandle {
                address,
                ..RawHandle::default()
            },
            kind,
            release: None,
        }
    }

    /// Zeroed native array of `count` elements, freed with the C allocator
    pub fn allocate(kind: HandleKind, count: usize) -> Result<Self> {
        Self::allocate_in(tracker::global(), kind, count)
    }

    /// Like [`allocate`](Self::allocate), charged to a specific tracker
    pub fn allocate_in(
        tracker: &Arc<AllocationTracker>,
        kind: HandleKind,
        count: usize,
    ) -> Result<Self> {
        let size = kind.element_size();
        let bytes = count.checked_mul(size).ok_or(Error::AllocationFailed {
            bytes: usize::MAX,
        })?;
        // SAFETY: calloc accepts any count/size pair and reports failure with null
        let address = unsafe { libc::calloc(count.max(1), size) } as usize;
        if address == 0 {
            return Err(Error::AllocationFailed { bytes });
        }
        log_allocation(kind.class_name(), address, bytes);

        let mut handle = Self::null(kind);
        handle.raw = RawHandle {
            address,
            position: 0,
            limit: count,
            capacity: count,
        };
        handle.set_deallocator_in(tracker, Box::new(FreeDeallocator { address }))?;
        Ok(handle)
    }

    /// Wrap a Rust buffer; releasing the handle drops the buffer
    pub fn from_buffer<E: Element + Send>(buffer: Vec<E>) -> Result<Self> {
        Self::from_buffer_in(tracker::global(), buffer)
    }

    pub fn from_buffer_in<E: Element + Send>(
        tracker: &Arc<AllocationTracker>,
        buffer: Vec<E>,
    ) -> Result<Self> {
        let mut buffer = buffer.into_boxed_slice();
        let count = buffer.len();
        let address = buffer.as_mut_ptr() as usize;

        let mut handle = Self::null(E::KIND);
        handle.raw = RawHandle {
            address,
            position: 0,
            limit: count,
            capacity: count,
        };
        handle.set_deallocator_in(tracker, Box::new(BufferDeallocator::new(buffer)))?;
        Ok(handle)
    }

    /// A view of the same memory whose release is chained to `source`
    pub fn from_handle(source: &AddressHandle) -> Self {
        Self {
            raw: source.raw,
            kind: source.kind.clone(),
            release: source.release.clone(),
        }
    }

    /// Same as `from_handle`, reinterpreting elements as another kind
    pub fn cast(&self, kind: HandleKind) -> Self {
        Self {
            raw: self.raw,
            kind,
            release: self.release.clone(),
        }
    }

    /// Install the deallocator for the current address against the global tracker
    pub fn set_deallocator(&mut self, deallocator: Box<dyn Deallocator>) -> Result<()> {
        self.set_deallocator_in(tracker::global(), deallocator)
    }

    /// Install the deallocator for the current address.
    ///
    /// A previously installed deallocator runs first. The capacity in bytes is
    /// admitted against the tracker ceilings; on refusal the new deallocator
    /// runs immediately and the handle becomes null. Admitted handles join the
    /// innermost owning scope of the current thread.
    pub fn set_deallocator_in(
        &mut self,
        tracker: &Arc<AllocationTracker>,
        deallocator: Box<dyn Deallocator>,
    ) -> Result<()> {
        if let Some(previous) = self.release.take() {
            previous.release();
        }

        let mut deallocator = deallocator;
        let bytes = self.raw.capacity.saturating_mul(self.element_size());
        let id = ReleaseCell::next_id();
        let registration = match tracker.try_admit(id, bytes) {
            Ok(registration) => registration,
            Err(err) => {
                deallocator.deallocate();
                self.raw.address = 0;
                return Err(err);
            }
        };

        let cell = Arc::new(ReleaseCell::new(
            id,
            self.kind.class_name().to_string(),
            deallocator,
            registration,
        ));
        scope::adopt(&cell, &self.kind);
        self.release = Some(cell);
        Ok(())
    }

    #[inline]
    pub fn address(&self) -> usize {
        self.raw.address
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.raw.position
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.raw.limit
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.raw.capacity
    }

    #[inline]
    pub fn kind(&self) -> &HandleKind {
        &self.kind
    }

    #[inline]
    pub fn raw(&self) -> &RawHandle {
        &self.raw
    }

    #[inline]
    pub(crate) fn raw_mut(&mut self) -> &mut RawHandle {
        &mut self.raw
    }

    /// Bytes per element of this handle
    #[inline]
    pub fn element_size(&self) -> usize {
        self.kind.element_size()
    }

    pub fn set_address(&mut self, address: usize) -> &mut Self {
        self.raw.address = address;
        self
    }

    pub fn set_position(&mut self, position: usize) -> &mut Self {
        self.raw.position = position;
        self
    }

    pub fn set_limit(&mut self, limit: usize) -> &mut Self {
        self.raw.limit = limit;
        self
    }

    /// Set the capacity; the limit follows it
    pub fn set_capacity(&mut self, capacity: usize) -> &mut Self {
        self.raw.limit = capacity;
        self.raw.capacity = capacity;
        self
    }

    /// Null address, or memory released through any view
    pub fn is_null(&self) -> bool {
        self.raw.address == 0 || self.release.as_ref().map_or(false, |c| c.is_released())
    }

    /// Whether the allocation is still charged to a tracker
    pub fn is_tracked(&self) -> bool {
        self.release.as_ref().map_or(false, |c| c.is_registered())
    }

    /// Address of the element at `position`
    #[inline]
    pub fn cursor(&self) -> *mut u8 {
        (self.raw.address + self.raw.position * self.element_size()) as *mut u8
    }

    /// Elements in `[position, limit)`, one element when `limit` is 0
    fn span(&self) -> Result<usize> {
        let RawHandle {
            position, limit, ..
        } = self.raw;
        if limit == 0 {
            return Ok(1);
        }
        limit
            .checked_sub(position)
            .ok_or(Error::LimitBeforePosition { limit, position })
    }

    fn require_address(&self) -> Result<()> {
        if self.is_null() {
            Err(Error::NullHandle)
        } else {
            Ok(())
        }
    }

    /// Read element `index` relative to `position`
    ///
    /// # Safety
    ///
    /// `address + (position + index) * size_of::<E>()` must be valid for reads.
    #[inline]
    pub unsafe fn get<E: Element>(&self, index: usize) -> E {
        let base = self.raw.address as *const E;
        base.add(self.raw.position + index).read_unaligned()
    }

    /// Write element `index` relative to `position`
    ///
    /// # Safety
    ///
    /// `address + (position + index) * size_of::<E>()` must be valid for writes.
    #[inline]
    pub unsafe fn put<E: Element>(&mut self, index: usize, value: E) -> &mut Self {
        let base = self.raw.address as *mut E;
        base.add(self.raw.position + index).write_unaligned(value);
        self
    }

    /// Copy `out.len()` elements starting at `position` into `out`
    ///
    /// # Safety
    ///
    /// The source range must be valid for reads.
    pub unsafe fn get_slice<E: Element>(&self, out: &mut [E]) -> Result<&Self> {
        self.require_address()?;
        let src = (self.raw.address as *const E).add(self.raw.position);
        core::ptr::copy(src as *const u8, out.as_mut_ptr() as *mut u8, core::mem::size_of_val(out));
        Ok(self)
    }

    /// Copy `values` into native memory starting at `position`
    ///
    /// # Safety
    ///
    /// The destination range must be valid for writes.
    pub unsafe fn put_slice<E: Element>(&mut self, values: &[E]) -> Result<&mut Self> {
        self.require_address()?;
        let dst = (self.raw.address as *mut E).add(self.raw.position);
        core::ptr::copy(values.as_ptr() as *const u8, dst as *mut u8, core::mem::size_of_val(values));
        Ok(self)
    }

    /// `[position, limit)` as bytes (one element when `limit` is 0)
    ///
    /// # Safety
    ///
    /// The range must be valid for reads and not mutated while borrowed.
    pub unsafe fn as_bytes(&self) -> Result<&[u8]> {
        let len = self.span()? * self.element_size();
        self.require_address()?;
        Ok(core::slice::from_raw_parts(self.cursor(), len))
    }

    /// Mutable variant of [`as_bytes`](Self::as_bytes)
    ///
    /// # Safety
    ///
    /// The range must be valid for writes and not aliased while borrowed.
    pub unsafe fn as_bytes_mut(&mut self) -> Result<&mut [u8]> {
        let len = self.span()? * self.element_size();
        self.require_address()?;
        Ok(core::slice::from_raw_parts_mut(self.cursor(), len))
    }

    /// Copy `source[position, limit)` (in its own element size) to this position
    ///
    /// # Safety
    ///
    /// Both ranges must be valid.
    pub unsafe fn put_handle(&mut self, source: &AddressHandle) -> Result<&mut Self> {
        let len = source.span()? * source.element_size();
        self.require_address()?;
        source.require_address()?;
        core::ptr::copy(source.cursor() as *const u8, self.cursor(), len);
        Ok(self)
    }

    /// Set every byte in `[position, limit)` to `byte`
    ///
    /// # Safety
    ///
    /// The range must be valid for writes.
    pub unsafe fn fill(&mut self, byte: u8) -> Result<&mut Self> {
        let len = self.span()? * self.element_size();
        self.require_address()?;
        core::ptr::write_bytes(self.cursor(), byte, len);
        Ok(self)
    }

    /// # Safety
    ///
    /// See [`fill`](Self::fill).
    pub unsafe fn zero(&mut self) -> Result<&mut Self> {
        self.fill(0)
    }

    /// Equality that treats `None` as the null handle
    pub fn eq_nullable(&self, other: Option<&AddressHandle>) -> bool {
        match other {
            None => self.is_null(),
            Some(other) => self == other,
        }
    }

    /// Run the deallocator now
    pub fn deallocate(&mut self) {
        self.deallocate_with(true);
    }

    /// With `true`, free the memory now. With `false`, uncharge it from the
    /// tracker and give up automatic release, leaving the memory to native code.
    pub fn deallocate_with(&mut self, free: bool) {
        let Some(cell) = self.release.as_ref() else {
            return;
        };
        if free {
            if cell.release() {
                debug!(target: "nativeport::handle", handle = ?self, "deallocated");
            }
            self.raw.address = 0;
        } else {
            cell.detach();
        }
    }

    /// Id shared by every view of this allocation
    pub fn release_cell_id(&self) -> Option<u64> {
        self.release.as_ref().map(|c| c.id())
    }

    pub(crate) fn release_cell(&self) -> Option<&Arc<ReleaseCell>> {
        self.release.as_ref()
    }

    /// Offset of `member` in this handle's class, as reported by its module
    pub fn offsetof(&self, member: &str) -> Option<usize> {
        offsets::offsetof(self.kind.class_name(), member)
    }

    /// Size of this handle's class, as reported by its module
    pub fn sizeof(&self) -> usize {
        match &self.kind {
            HandleKind::Named { name, size } => offsets::sizeof(name).unwrap_or(*size),
            builtin => builtin.element_size(),
        }
    }

    /// Pointer to hand to generated entry points as `np_handle*`
    pub fn as_native(&mut self) -> *mut c_void {
        self as *mut AddressHandle as *mut c_void
    }
}

impl Clone for AddressHandle {
    fn clone(&self) -> Self {
        Self::from_handle(self)
    }
}

impl PartialEq for AddressHandle {
    fn eq(&self, other: &Self) -> bool {
        if core::ptr::eq(self, other) {
            return true;
        }
        if self.kind != other.kind && !self.kind.is_base() && !other.kind.is_base() {
            return false;
        }
        self.raw.address == other.raw.address && self.raw.position == other.raw.position
    }
}

impl Eq for AddressHandle {}

impl core::hash::Hash for AddressHandle {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.raw.address.hash(state);
    }
}

impl core::fmt::Debug for AddressHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}[address={:#x},position={},limit={},capacity={},release={:?}]",
            self.kind.class_name(),
            self.raw.address,
            self.raw.position,
            self.raw.limit,
            self.raw.capacity,
            self.release.as_ref().map(|c| c.id())
        )
    }
}
