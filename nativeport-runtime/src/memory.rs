//! Process memory probes and byte-size text helpers
//!
//! Design: every probe returns `Option` so platforms without a cheap way to
//! read the resident set simply never throttle on physical memory.

use crate::error::{Error, Result};

/// Render a byte count with a K/M/G/T suffix once it passes 100 units
pub fn format_bytes(bytes: usize) -> String {
    const STEP: usize = 1024;
    const THRESHOLD: usize = STEP * 100;

    if bytes < THRESHOLD {
        return bytes.to_string();
    }
    let mut value = bytes / STEP;
    for suffix in ["K", "M", "G"] {
        if value < THRESHOLD {
            return format!("{}{}", value, suffix);
        }
        value /= STEP;
    }
    format!("{}T", value)
}

/// Parse "512", "64k", "10MB", "2g", or "25%" (of `relative_to`) into bytes
pub fn parse_bytes(text: &str, relative_to: usize) -> Result<usize> {
    let invalid = || Error::InvalidConfig {
        key: "bytes".to_string(),
        value: text.to_string(),
    };

    let text = text.trim();
    let digits_end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let size: usize = text[..digits_end].parse().map_err(|_| invalid())?;

    let shift = match text[digits_end..].trim().to_ascii_lowercase().as_str() {
        "" => 0,
        "k" | "kb" => 10,
        "m" | "mb" => 20,
        "g" | "gb" => 30,
        "t" | "tb" => 40,
        "%" => {
            return size
                .checked_mul(relative_to)
                .map(|v| v / 100)
                .ok_or_else(invalid)
        }
        _ => return Err(invalid()),
    };
    1usize
        .checked_shl(shift)
        .and_then(|unit| size.checked_mul(unit))
        .ok_or_else(invalid)
}

/// Resident set size of the current process
pub fn physical_bytes() -> Option<usize> {
    platform::physical_bytes()
}

/// Installed physical memory
pub fn total_physical_bytes() -> Option<usize> {
    platform::total_physical_bytes()
}

/// Physical memory currently free for new pages
pub fn available_physical_bytes() -> Option<usize> {
    platform::available_physical_bytes()
}

/// Ask the C allocator to hand unused pages back to the OS.
///
/// Returns `true` when the platform supports trimming.
pub fn trim_memory() -> bool {
    platform::trim_memory()
}

#[cfg(target_os = "linux")]
mod platform {
    fn page_size() -> usize {
        // SAFETY: sysconf has no preconditions
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as usize
        } else {
            4096
        }
    }

    pub fn physical_bytes() -> Option<usize> {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let resident: usize = statm.split_whitespace().nth(1)?.parse().ok()?;
        Some(resident * page_size())
    }

    pub fn total_physical_bytes() -> Option<usize> {
        // SAFETY: sysconf has no preconditions
        let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
        (pages > 0).then(|| pages as usize * page_size())
    }

    pub fn available_physical_bytes() -> Option<usize> {
        // SAFETY: sysconf has no preconditions
        let pages = unsafe { libc::sysconf(libc::_SC_AVPHYS_PAGES) };
        (pages > 0).then(|| pages as usize * page_size())
    }

    #[cfg(target_env = "gnu")]
    pub fn trim_memory() -> bool {
        // SAFETY: malloc_trim only walks allocator arenas
        unsafe { libc::malloc_trim(0) };
        true
    }

    #[cfg(not(target_env = "gnu"))]
    pub fn trim_memory() -> bool {
        false
    }
}

#[cfg(windows)]
mod platform {
    use winapi::um::processthreadsapi::GetCurrentProcess;
    use winapi::um::psapi::{EmptyWorkingSet, GetProcessMemoryInfo, PROCESS_MEMORY_COUNTERS};
    use winapi::um::sysinfoapi::{GlobalMemoryStatusEx, MEMORYSTATUSEX};

    fn memory_status() -> Option<MEMORYSTATUSEX> {
        // SAFETY: MEMORYSTATUSEX is plain data and dwLength is set before the call
        unsafe {
            let mut status: MEMORYSTATUSEX = core::mem::zeroed();
            status.dwLength = core::mem::size_of::<MEMORYSTATUSEX>() as u32;
            (GlobalMemoryStatusEx(&mut status) != 0).then_some(status)
        }
    }

    pub fn physical_bytes() -> Option<usize> {
        // SAFETY: the counters struct is plain data sized by `cb`
        unsafe {
            let mut counters: PROCESS_MEMORY_COUNTERS = core::mem::zeroed();
            let size = core::mem::size_of::<PROCESS_MEMORY_COUNTERS>() as u32;
            counters.cb = size;
            (GetProcessMemoryInfo(GetCurrentProcess(), &mut counters, size) != 0)
                .then_some(counters.WorkingSetSize)
        }
    }

    pub fn total_physical_bytes() -> Option<usize> {
        memory_status().map(|s| s.ullTotalPhys as usize)
    }

    pub fn available_physical_bytes() -> Option<usize> {
        memory_status().map(|s| s.ullAvailPhys as usize)
    }

    pub fn trim_memory() -> bool {
        // SAFETY: operates on the pseudo handle of the current process
        unsafe { EmptyWorkingSet(GetCurrentProcess()) != 0 }
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
mod platform {
    pub fn physical_bytes() -> Option<usize> {
        None
    }

    pub fn total_physical_bytes() -> Option<usize> {
        // SAFETY: sysconf has no preconditions
        let (pages, size) = unsafe {
            (
                libc::sysconf(libc::_SC_PHYS_PAGES),
                libc::sysconf(libc::_SC_PAGESIZE),
            )
        };
        (pages > 0 && size > 0).then(|| pages as usize * size as usize)
    }

    pub fn available_physical_bytes() -> Option<usize> {
        None
    }

    pub fn trim_memory() -> bool {
        false
    }
}

#[cfg(not(any(unix, windows)))]
mod platform {
    pub fn physical_bytes() -> Option<usize> {
        None
    }

    pub fn total_physical_bytes() -> Option<usize> {
        None
    }

    pub fn available_physical_bytes() -> Option<usize> {
        None
    }

    pub fn trim_memory() -> bool {
        false
    }
}
