//! Dynamic loading of generated modules
//!
//! Platform-agnostic wrapper around dlopen/LoadLibrary, plus the module
//! lifecycle: after a library opens, its `np_module_load` hook receives the
//! `np_env` vtable and registers member offsets. Loaded modules are kept in
//! an identity map so each library is opened once per process.

use crate::error::{Error, Result};
use crate::ffi::{self, NativeEnv, ABI_VERSION};
use crate::logging::log_library_load;
use core::ffi::{c_int, c_void};
use core::ptr::NonNull;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

pub const MODULE_LOAD: &str = "np_module_load";
pub const MODULE_UNLOAD: &str = "np_module_unload";

type LoadHook = unsafe extern "C" fn(*mut NativeEnv) -> c_int;
type UnloadHook = unsafe extern "C" fn(*mut NativeEnv);

static LOADED: Lazy<DashMap<String, Arc<Module>>> = Lazy::new(DashMap::new);

/// Handle to a dynamically loaded library
pub struct Library {
    handle: NonNull<c_void>,
    path: String,
}

impl Library {
    /// Open a library by file name (system search) or path
    pub fn open(path: &str) -> Result<Self> {
        let handle = Self::open_impl(path)?;
        Ok(Self {
            handle,
            path: path.to_string(),
        })
    }

    #[cfg(unix)]
    fn open_impl(path: &str) -> Result<NonNull<c_void>> {
        let cname = CString::new(path).map_err(|_| linkage(path, "name contains NUL"))?;

        // SAFETY: cname is NUL-terminated; dlerror is read right after the failure
        unsafe {
            let handle = libc::dlopen(cname.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL);
            NonNull::new(handle).ok_or_else(|| {
                let err = libc::dlerror();
                let msg = if !err.is_null() {
                    std::ffi::CStr::from_ptr(err).to_string_lossy().into_owned()
                } else {
                    "Unknown error".into()
                };
                linkage(path, &msg)
            })
        }
    }

    #[cfg(windows)]
    fn open_impl(path: &str) -> Result<NonNull<c_void>> {
        use std::ffi::OsStr;
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::errhandlingapi::GetLastError;
        use winapi::um::libloaderapi::LoadLibraryW;

        let wide: Vec<u16> = OsStr::new(path).encode_wide().chain(Some(0)).collect();

        // SAFETY: wide is NUL-terminated UTF-16
        unsafe {
            let handle = LoadLibraryW(wide.as_ptr());
            NonNull::new(handle as *mut c_void).ok_or_else(|| {
                let code = GetLastError();
                linkage(path, &format!("Error code: {}", code))
            })
        }
    }

    #[cfg(not(any(unix, windows)))]
    fn open_impl(path: &str) -> Result<NonNull<c_void>> {
        Err(linkage(path, "dynamic loading is not supported on this platform"))
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Address of an exported symbol
    pub fn symbol(&self, name: &str) -> Result<NonNull<c_void>> {
        let cname = CString::new(name).map_err(|_| linkage(name, "name contains NUL"))?;
        let ptr = self.symbol_impl(&cname);
        NonNull::new(ptr).ok_or_else(|| linkage(name, &format!("symbol not found in {}", self.path)))
    }

    #[cfg(unix)]
    fn symbol_impl(&self, name: &CString) -> *mut c_void {
        // SAFETY: the handle stays open for the lifetime of self
        unsafe { libc::dlsym(self.handle.as_ptr(), name.as_ptr()) }
    }

    #[cfg(windows)]
    fn symbol_impl(&self, name: &CString) -> *mut c_void {
        use winapi::um::libloaderapi::GetProcAddress;
        // SAFETY: the handle stays open for the lifetime of self
        unsafe { GetProcAddress(self.handle.as_ptr() as _, name.as_ptr()) as *mut c_void }
    }

    #[cfg(not(any(unix, windows)))]
    fn symbol_impl(&self, _name: &CString) -> *mut c_void {
        core::ptr::null_mut()
    }
}

impl Drop for Library {
    #[cfg(unix)]
    fn drop(&mut self) {
        // SAFETY: the handle came from dlopen and is closed once
        unsafe {
            libc::dlclose(self.handle.as_ptr());
        }
    }

    #[cfg(windows)]
    fn drop(&mut self) {
        use winapi::um::libloaderapi::FreeLibrary;
        // SAFETY: the handle came from LoadLibraryW and is freed once
        unsafe {
            FreeLibrary(self.handle.as_ptr() as _);
        }
    }

    #[cfg(not(any(unix, windows)))]
    fn drop(&mut self) {}
}

// SAFETY: library handles are process-global and thread-agnostic
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

impl core::fmt::Debug for Library {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Library").field("path", &self.path).finish()
    }
}

fn linkage(name: &str, reason: &str) -> Error {
    Error::Linkage {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// A loaded generated module
#[derive(Debug)]
pub struct Module {
    name: String,
    library: Library,
    has_hooks: bool,
}

impl Module {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn library(&self) -> &Library {
        &self.library
    }

    /// Resolve a generated entry point
    pub fn entry(&self, symbol: &str) -> Result<NonNull<c_void>> {
        self.library.symbol(symbol)
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        if !self.has_hooks {
            return;
        }
        if let Ok(hook) = self.library.symbol(MODULE_UNLOAD) {
            // SAFETY: generated modules export np_module_unload with this signature
            unsafe {
                let hook: UnloadHook = core::mem::transmute(hook.as_ptr());
                hook(ffi::native_env());
            }
        }
    }
}

/// Platform conventions for library file names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryNaming {
    pub prefix: String,
    pub suffix: String,
}

impl Default for LibraryNaming {
    fn default() -> Self {
        Self {
            prefix: std::env::consts::DLL_PREFIX.to_string(),
            suffix: std::env::consts::DLL_SUFFIX.to_string(),
        }
    }
}

impl LibraryNaming {
    /// `jnifoo` → `libjnifoo.so` on Linux, `jnifoo.dll` on Windows
    pub fn file_name(&self, name: &str) -> String {
        format!("{}{}{}", self.prefix, name, self.suffix)
    }
}

/// Opens generated modules, preloads first, each library at most once
#[derive(Debug, Default, Clone)]
pub struct Loader {
    naming: LibraryNaming,
    search_paths: Vec<PathBuf>,
    preloads: Vec<String>,
}

impl Loader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn naming(mut self, naming: LibraryNaming) -> Self {
        self.naming = naming;
        self
    }

    /// Directory tried before the system search path
    pub fn search_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_paths.push(dir.into());
        self
    }

    /// Library loaded before any module; failures are only logged
    pub fn preload(mut self, name: impl Into<String>) -> Self {
        self.preloads.push(name.into());
        self
    }

    fn candidates(&self, name: &str) -> Vec<String> {
        if Path::new(name).components().count() > 1 || name.ends_with(&self.naming.suffix) {
            return vec![name.to_string()];
        }
        let file_name = self.naming.file_name(name);
        let mut candidates: Vec<String> = self
            .search_paths
            .iter()
            .map(|dir| dir.join(&file_name).to_string_lossy().into_owned())
            .collect();
        candidates.push(file_name);
        candidates
    }

    fn open_first(&self, name: &str) -> Result<Library> {
        let mut last_error = linkage(name, "no candidate paths");
        for candidate in self.candidates(name) {
            match Library::open(&candidate) {
                Ok(library) => return Ok(library),
                Err(err) => {
                    debug!(target: "nativeport::loader", candidate = %candidate, error = %err, "candidate rejected");
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    /// Load `name` (after the preloads) and run its module hook
    pub fn load(&self, name: &str) -> Result<Arc<Module>> {
        if let Some(module) = LOADED.get(name) {
            return Ok(Arc::clone(module.value()));
        }

        for preload in &self.preloads {
            if LOADED.contains_key(preload.as_str()) {
                continue;
            }
            match self.open_first(preload) {
                Ok(library) => {
                    log_library_load(preload, library.path());
                    LOADED.insert(
                        preload.clone(),
                        Arc::new(Module {
                            name: preload.clone(),
                            library,
                            has_hooks: false,
                        }),
                    );
                }
                Err(err) => debug!(target: "nativeport::loader", preload = %preload, error = %err, "preload skipped"),
            }
        }

        let library = self.open_first(name)?;
        let has_hooks = match library.symbol(MODULE_LOAD) {
            Ok(hook) => {
                // SAFETY: generated modules export np_module_load with this signature
                let version = unsafe {
                    let hook: LoadHook = core::mem::transmute(hook.as_ptr());
                    hook(ffi::native_env())
                };
                if version != ABI_VERSION {
                    return Err(linkage(
                        name,
                        &format!("module built for ABI {} but runtime speaks {}", version, ABI_VERSION),
                    ));
                }
                ffi::take_pending_error()?;
                true
            }
            Err(_) => {
                warn!(target: "nativeport::loader", name, "library has no module hook");
                false
            }
        };
        log_library_load(name, library.path());

        let module = Arc::new(Module {
            name: name.to_string(),
            library,
            has_hooks,
        });
        let module = LOADED
            .entry(name.to_string())
            .or_insert(module)
            .value()
            .clone();
        Ok(module)
    }
}

/// A module loaded earlier through any [`Loader`]
pub fn module(name: &str) -> Result<Arc<Module>> {
    LOADED
        .get(name)
        .map(|m| Arc::clone(m.value()))
        .ok_or_else(|| Error::ModuleNotLoaded {
            module: name.to_string(),
        })
}

/// Resolve an entry point of a loaded module
pub fn entry(module_name: &str, symbol: &str) -> Result<NonNull<c_void>> {
    module(module_name)?.entry(symbol)
}

pub fn is_loaded(name: &str) -> bool {
    LOADED.contains_key(name)
}
