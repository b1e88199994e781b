//! Windows module lookup via the loader and PSAPI

use std::ffi::OsString;
use std::os::windows::ffi::OsStringExt;
use std::os::windows::io::{AsRawHandle, OwnedHandle};
use std::path::PathBuf;

use windows_sys::Win32::Foundation::{HANDLE, HMODULE, MAX_PATH};
use windows_sys::Win32::System::LibraryLoader::{
    GetModuleFileNameW, GetModuleHandleExW, GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS,
    GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
};
use windows_sys::Win32::System::ProcessStatus::{
    K32EnumProcessModules, K32GetModuleFileNameExW, K32GetModuleInformation, MODULEINFO,
};
use windows_sys::Win32::System::Threading::GetCurrentProcess;

use crate::core::{PhysicalAddress, Result};
use crate::maps::{wait_before_retry, ModuleInfo, LOOKUP_RETRY_COUNT};

/// Find the image of the current process that contains `addr`.
///
/// The unchanged-refcount flag keeps this a pure query; no handle needs to
/// be released afterwards.
pub(crate) fn lookup_local(addr: PhysicalAddress) -> Option<ModuleInfo> {
    let mut module: HMODULE = std::ptr::null_mut();
    let found = unsafe {
        GetModuleHandleExW(
            GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS | GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
            addr.handle() as *const u16,
            &mut module,
        )
    };
    if found == 0 || module.is_null() {
        return None;
    }

    let info = module_information(unsafe { GetCurrentProcess() }, module)?;
    let mut path = vec![0u16; MAX_PATH as usize];
    loop {
        let filled =
            unsafe { GetModuleFileNameW(module, path.as_mut_ptr(), path.len() as u32) } as usize;
        if filled == 0 {
            return None;
        }
        if filled < path.len() {
            path.truncate(filled);
            break;
        }
        path.resize(path.len() * 2, 0);
    }

    Some(ModuleInfo {
        base_offset: info.lpBaseOfDll as usize,
        file_name: PathBuf::from(OsString::from_wide(&path)),
    })
}

/// Module lookup in another process, through an exclusively owned handle
/// released on drop.
pub(crate) struct RemoteModuleMap {
    process: OwnedHandle,
}

impl RemoteModuleMap {
    pub(crate) fn for_process(process: OwnedHandle) -> Result<Self> {
        Ok(Self { process })
    }

    /// Enumerate the target's modules and select the one whose range
    /// contains `addr`.
    ///
    /// Module load and unload in the target is concurrent with the
    /// enumeration, so any failing step restarts it; a complete enumeration
    /// that does not contain the address is a miss, not a retry.
    pub(crate) fn lookup(&self, addr: PhysicalAddress) -> Option<ModuleInfo> {
        let process = self.process.as_raw_handle() as HANDLE;
        for attempt in 0..LOOKUP_RETRY_COUNT {
            let Some(modules) = enumerate_modules(process) else {
                wait_before_retry(attempt);
                continue;
            };

            let mut containing = None;
            let mut failed = false;
            for module in modules {
                let Some(info) = module_information(process, module) else {
                    failed = true;
                    break;
                };
                let base = info.lpBaseOfDll as usize;
                if addr.handle() >= base && addr.handle() - base < info.SizeOfImage as usize {
                    containing = Some((module, base));
                    break;
                }
            }
            if failed {
                wait_before_retry(attempt);
                continue;
            }
            let Some((module, base)) = containing else { return None };

            let Some(file_name) = remote_module_file_name(process, module) else {
                wait_before_retry(attempt);
                continue;
            };
            return Some(ModuleInfo { base_offset: base, file_name });
        }
        tracing::warn!("remote module lookup exhausted its retry budget");
        None
    }
}

fn enumerate_modules(process: HANDLE) -> Option<Vec<HMODULE>> {
    let mut modules: Vec<HMODULE> = vec![std::ptr::null_mut(); 64];
    loop {
        let available = (modules.len() * std::mem::size_of::<HMODULE>()) as u32;
        let mut needed = 0u32;
        let ok =
            unsafe { K32EnumProcessModules(process, modules.as_mut_ptr(), available, &mut needed) };
        if ok == 0 {
            return None;
        }
        let needed_count = needed as usize / std::mem::size_of::<HMODULE>();
        if needed_count <= modules.len() {
            modules.truncate(needed_count);
            if modules.is_empty() {
                return None;
            }
            return Some(modules);
        }
        modules.resize(needed_count, std::ptr::null_mut());
    }
}

fn module_information(process: HANDLE, module: HMODULE) -> Option<MODULEINFO> {
    let mut info: MODULEINFO = unsafe { std::mem::zeroed() };
    let ok = unsafe {
        K32GetModuleInformation(process, module, &mut info, std::mem::size_of::<MODULEINFO>() as u32)
    };
    (ok != 0).then_some(info)
}

fn remote_module_file_name(process: HANDLE, module: HMODULE) -> Option<PathBuf> {
    let mut path = vec![0u16; MAX_PATH as usize];
    loop {
        let filled =
            unsafe { K32GetModuleFileNameExW(process, module, path.as_mut_ptr(), path.len() as u32) }
                as usize;
        if filled == 0 {
            return None;
        }
        if filled < path.len() {
            path.truncate(filled);
            break;
        }
        path.resize(path.len() * 2, 0);
    }
    Some(PathBuf::from(OsString::from_wide(&path)))
}
