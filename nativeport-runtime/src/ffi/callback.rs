//! Managed targets for callback trampolines and virtual overrides
//!
//! Generated callback allocators store an opaque key in the native function
//! object; trampolines pass that key back through `np_env::invoke`, which
//! dispatches to the closure registered under it.

use super::NativeValue;
use crate::error::Result;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

type Target = dyn Fn(&Invocation<'_>) -> Result<NativeValue> + Send + Sync;

static CALLBACKS: Lazy<DashMap<usize, Arc<Target>>> = Lazy::new(DashMap::new);
static NEXT_KEY: AtomicUsize = AtomicUsize::new(1);

/// One call arriving from native code
#[derive(Debug)]
pub struct Invocation<'a> {
    /// Managed method name the trampoline was generated for
    pub method: &'a str,
    pub args: &'a [NativeValue],
}

/// Keeps a callback target registered; unregisters on drop
#[derive(Debug)]
#[must_use = "the callback is unregistered when the registration is dropped"]
pub struct CallbackRegistration {
    key: usize,
}

impl CallbackRegistration {
    /// Opaque key to pass to a generated callback allocator
    #[inline]
    pub fn key(&self) -> *mut core::ffi::c_void {
        self.key as *mut core::ffi::c_void
    }
}

impl Drop for CallbackRegistration {
    fn drop(&mut self) {
        CALLBACKS.remove(&self.key);
        debug!(target: "nativeport::ffi", key = self.key, "callback unregistered");
    }
}

/// Register a target for callbacks carrying the returned key
pub fn register_callback<F>(target: F) -> CallbackRegistration
where
    F: Fn(&Invocation<'_>) -> Result<NativeValue> + Send + Sync + 'static,
{
    let key = NEXT_KEY.fetch_add(1, Ordering::Relaxed);
    CALLBACKS.insert(key, Arc::new(target));
    debug!(target: "nativeport::ffi", key, "callback registered");
    CallbackRegistration { key }
}

/// Target for `key`, cloned out so the map is not locked during the call
pub(crate) fn lookup(key: usize) -> Option<Arc<Target>> {
    CALLBACKS.get(&key).map(|entry| Arc::clone(entry.value()))
}

pub fn registered_callbacks() -> usize {
    CALLBACKS.len()
}
