//! Module maps: which loaded image owns an address
//!
//! The local variant answers for the current process; the remote variant
//! answers for another process whose module list may change concurrently
//! with our enumeration, so it retries with a short back-off before giving
//! up and reporting a miss.

use std::path::PathBuf;
use std::time::Duration;

use crate::core::PhysicalAddress;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod proc_maps;
        mod unix;
        pub(crate) use unix::{lookup_local, RemoteModuleMap};
    } else if #[cfg(windows)] {
        mod windows;
        pub(crate) use windows::{lookup_local, RemoteModuleMap};
    }
}

/// The loaded image containing an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Load base of the image in the target's address space.
    pub base_offset: usize,
    /// Path of the image file.
    pub file_name: PathBuf,
}

pub(crate) const LOOKUP_RETRY_COUNT: u32 = 10;

/// Back-off before remote-lookup attempt `attempt + 1`.
///
/// Schedule: yield, 1 ms, 10 ms, then 10 ms more per attempt capped at
/// 100 ms. Module load and unload in the target is usually over within a
/// few milliseconds, so the early attempts stay cheap.
pub(crate) fn wait_before_retry(attempt: u32) {
    const WAIT_STEP: Duration = Duration::from_millis(10);
    const MAX_WAIT: Duration = Duration::from_millis(100);
    match attempt {
        0 => std::thread::yield_now(),
        1 => std::thread::sleep(Duration::from_millis(1)),
        2 => std::thread::sleep(WAIT_STEP),
        _ => std::thread::sleep((WAIT_STEP * (attempt - 2)).min(MAX_WAIT)),
    }
}

/// The map a resolver consults, chosen at construction.
pub(crate) enum MapSource {
    Local,
    Remote(RemoteModuleMap),
}

impl MapSource {
    pub(crate) fn lookup(&self, addr: PhysicalAddress) -> Option<ModuleInfo> {
        match self {
            MapSource::Local => lookup_local(addr),
            MapSource::Remote(remote) => remote.lookup(addr),
        }
    }
}
