//! Unix module lookup: `dladdr` locally, `/proc/<pid>/maps` remotely

use std::ffi::CStr;
use std::fs;
use std::io::Read;
use std::os::fd::OwnedFd;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use crate::core::{Error, PhysicalAddress, Result};
use crate::maps::proc_maps::{self, ImageRegion};
use crate::maps::{wait_before_retry, ModuleInfo, LOOKUP_RETRY_COUNT};

/// Find the image of the current process that contains `addr`.
///
/// `dladdr` neither takes locks we care about nor touches the image's
/// reference count, so this is stateless and thread-safe.
pub(crate) fn lookup_local(addr: PhysicalAddress) -> Option<ModuleInfo> {
    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    let found = unsafe { libc::dladdr(addr.handle() as *const libc::c_void, &mut info) };
    if found == 0 || info.dli_fname.is_null() {
        return None;
    }
    let file_name = unsafe { CStr::from_ptr(info.dli_fname) };
    if file_name.is_empty() {
        return None;
    }
    Some(ModuleInfo {
        base_offset: info.dli_fbase as usize,
        file_name: PathBuf::from(std::ffi::OsStr::from_bytes(file_name.to_bytes())),
    })
}

enum MapsSource {
    /// Re-enumerate the target's maps on every lookup; the target is live
    /// and its module list changes underneath us.
    Pid(u32),
    /// A one-shot snapshot taken from a maps descriptor handed to us.
    Snapshot(Vec<ImageRegion>),
}

/// Module lookup in another process.
pub(crate) struct RemoteModuleMap {
    source: MapsSource,
}

impl RemoteModuleMap {
    pub(crate) fn for_process(pid: u32) -> Result<Self> {
        // Probe readability up front so an invalid pid fails construction
        // instead of silently yielding empty lookups.
        fs::metadata(format!("/proc/{pid}/maps")).map_err(|_| Error::ProcessNotFound { pid })?;
        Ok(Self { source: MapsSource::Pid(pid) })
    }

    /// Take ownership of an already-opened maps descriptor and consume it.
    pub(crate) fn from_proc_maps(maps: OwnedFd) -> Result<Self> {
        let mut file = fs::File::from(maps);
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        let images = proc_maps::build_images(&proc_maps::parse_maps(&content));
        if images.is_empty() {
            return Err(Error::MalformedMaps);
        }
        Ok(Self { source: MapsSource::Snapshot(images) })
    }

    pub(crate) fn lookup(&self, addr: PhysicalAddress) -> Option<ModuleInfo> {
        match &self.source {
            MapsSource::Snapshot(images) => {
                proc_maps::find_image(images, addr.handle() as u64).map(module_info)
            }
            MapsSource::Pid(pid) => lookup_live(*pid, addr),
        }
    }
}

/// Enumerate a live target with retries.
///
/// A maps read can fail or come back empty while the target is mid-exec or
/// exiting; any such failure restarts the enumeration. A successful
/// enumeration that simply does not contain the address is a miss, not a
/// retry.
fn lookup_live(pid: u32, addr: PhysicalAddress) -> Option<ModuleInfo> {
    let path = format!("/proc/{pid}/maps");
    for attempt in 0..LOOKUP_RETRY_COUNT {
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                tracing::debug!("maps read for pid {pid} failed (attempt {attempt}): {err}");
                wait_before_retry(attempt);
                continue;
            }
        };
        let images = proc_maps::build_images(&proc_maps::parse_maps(&content));
        if images.is_empty() {
            tracing::debug!("maps for pid {pid} held no images (attempt {attempt})");
            wait_before_retry(attempt);
            continue;
        }
        return proc_maps::find_image(&images, addr.handle() as u64).map(module_info);
    }
    tracing::warn!("module lookup for pid {pid} exhausted its retry budget");
    None
}

fn module_info(image: &ImageRegion) -> ModuleInfo {
    ModuleInfo { base_offset: image.base as usize, file_name: image.path.clone() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_lookup_finds_our_own_image() {
        let probe = lookup_local as usize;
        let info = lookup_local(PhysicalAddress::new(probe)).expect("own code must resolve");
        assert!(!info.file_name.as_os_str().is_empty());
    }

    #[test]
    fn local_lookup_misses_unmapped_addresses() {
        assert!(lookup_local(PhysicalAddress::new(1)).is_none());
    }

    #[test]
    fn remote_lookup_on_own_pid() {
        let map = RemoteModuleMap::for_process(std::process::id()).expect("own pid is alive");
        let probe = lookup_local as usize;
        let info = map.lookup(PhysicalAddress::new(probe)).expect("own code must resolve");
        assert!(!info.file_name.as_os_str().is_empty());
        assert!(info.base_offset <= probe);
    }

    #[test]
    fn invalid_pid_fails_construction() {
        assert!(RemoteModuleMap::for_process(u32::MAX - 1).is_err());
    }
}
