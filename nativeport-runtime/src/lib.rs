//! nativeport runtime - native memory handles for generated bindings
//!
//! This crate provides the pieces Rust code and generated C++ glue share at
//! runtime:
//! - `handle` - `AddressHandle`, a position/limit/capacity view of native memory
//! - `indexer` - strided multi-dimensional element access over a handle
//! - `tracker` - deallocation registry, memory ceilings, background reclamation
//! - `scope` - thread-local scopes that release handles deterministically
//! - `ffi` - the `np_env` vtable generated code calls back into
//! - `loader` - opening generated modules and resolving their entry points

pub mod config;
pub mod error;
pub mod ffi;
pub mod handle;
pub mod indexer;
pub mod loader;
pub mod logging;
pub mod memory;
pub mod offsets;
pub mod scope;
pub mod tracker;

pub use config::RuntimeConfig;
pub use error::{Ceiling, Error, Result};
pub use handle::{AddressHandle, Deallocator, Element, HandleKind};
pub use indexer::Indexer;
pub use memory::{
    available_physical_bytes, format_bytes, parse_bytes, physical_bytes, total_physical_bytes,
    trim_memory,
};
pub use scope::Scope;
pub use tracker::AllocationTracker;

/// Runtime initialization: logging, frozen configuration, global tracker
pub fn init() {
    logging::init();
    let config = config::get();
    let tracker = tracker::global();
    tracing::info!(
        target: "nativeport::runtime",
        max_bytes = %format_bytes(config.max_bytes),
        max_physical_bytes = %format_bytes(config.max_physical_bytes),
        reclaim = ?tracker.mode(),
        "runtime initialized"
    );
}

/// Runtime initialization for C hosts
#[no_mangle]
pub extern "C" fn nativeport_runtime_init() {
    init();
}

/// The `np_env` vtable, for C hosts that load generated modules themselves
#[no_mangle]
pub extern "C" fn nativeport_env() -> *mut ffi::NativeEnv {
    ffi::native_env()
}
