//! Deallocators and the release cell shared by views of one allocation

use crate::logging::log_deallocation;
use crate::tracker::{PendingRelease, Registration};
use core::ffi::c_void;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Releases one native allocation; called at most once
pub trait Deallocator: Send {
    fn deallocate(&mut self);
}

impl<F: FnMut() + Send> Deallocator for F {
    fn deallocate(&mut self) {
        self()
    }
}

/// Frees memory obtained from the C allocator
#[derive(Debug)]
pub struct FreeDeallocator {
    pub address: usize,
}

impl Deallocator for FreeDeallocator {
    fn deallocate(&mut self) {
        // SAFETY: the address came from malloc/calloc/realloc and is freed once
        unsafe { libc::free(self.address as *mut c_void) }
    }
}

/// Calls a native deallocator function supplied by generated code
#[derive(Debug)]
pub struct NativeDeallocator {
    pub owner: usize,
    pub function: unsafe extern "C" fn(*mut c_void),
}

// SAFETY: generated deallocators only delete the owner object
unsafe impl Send for NativeDeallocator {}

impl Deallocator for NativeDeallocator {
    fn deallocate(&mut self) {
        // SAFETY: owner and function were paired by the module that created them
        unsafe { (self.function)(self.owner as *mut c_void) }
    }
}

/// Keeps a Rust buffer alive until the handle is released
pub struct BufferDeallocator<T: Send> {
    buffer: Option<Box<[T]>>,
}

impl<T: Send> BufferDeallocator<T> {
    pub fn new(buffer: Box<[T]>) -> Self {
        Self {
            buffer: Some(buffer),
        }
    }
}

impl<T: Send> Deallocator for BufferDeallocator<T> {
    fn deallocate(&mut self) {
        self.buffer = None;
    }
}

struct ReleaseState {
    deallocator: Option<Box<dyn Deallocator>>,
    registration: Option<Registration>,
}

/// Owner of one deallocator, shared by every view of the allocation.
///
/// An explicit release through any view frees the memory once and marks the
/// cell released for all of them. When the last view drops without an
/// explicit release, the cell hands its deallocator to the tracker.
pub(crate) struct ReleaseCell {
    id: u64,
    label: String,
    released: AtomicBool,
    state: Mutex<ReleaseState>,
}

impl ReleaseCell {
    pub fn new(
        id: u64,
        label: String,
        deallocator: Box<dyn Deallocator>,
        registration: Registration,
    ) -> Self {
        Self {
            id,
            label,
            released: AtomicBool::new(false),
            state: Mutex::new(ReleaseState {
                deallocator: Some(deallocator),
                registration: Some(registration),
            }),
        }
    }

    /// Id to register under before the cell exists
    pub fn next_id() -> u64 {
        NEXT_ID.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Run the deallocator now; returns `false` if it already ran
    pub fn release(&self) -> bool {
        let (deallocator, registration) = {
            let mut state = self.state.lock();
            if self.released.swap(true, Ordering::AcqRel) {
                return false;
            }
            (state.deallocator.take(), state.registration.take())
        };
        let bytes = registration.as_ref().map_or(0, Registration::bytes);
        if let Some(mut deallocator) = deallocator {
            deallocator.deallocate();
            log_deallocation(&self.label, bytes, false);
        }
        drop(registration);
        true
    }

    /// Uncharge the bytes and stop automatic release; memory stays allocated
    pub fn detach(&self) -> bool {
        let registration = self.state.lock().registration.take();
        registration.is_some()
    }

    pub fn is_registered(&self) -> bool {
        self.state.lock().registration.is_some()
    }
}

impl Drop for ReleaseCell {
    fn drop(&mut self) {
        if self.is_released() {
            return;
        }
        let state = self.state.get_mut();
        let Some(deallocator) = state.deallocator.take() else {
            return;
        };
        let Some(registration) = state.registration.take() else {
            // Detached: the allocation belongs to native code now
            core::mem::forget(deallocator);
            return;
        };
        let tracker = registration.tracker().clone();
        tracker.dispose(PendingRelease {
            label: core::mem::take(&mut self.label),
            deallocator,
            registration,
        });
    }
}

impl core::fmt::Debug for ReleaseCell {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReleaseCell")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("released", &self.is_released())
            .finish()
    }
}
