//! Unix stack walking
//!
//! The CFI walk itself is done by the platform unwinder behind the
//! `backtrace` crate. Context-based capture anchors that walk at the
//! context's stack pointer: every frame whose canonical frame address lies
//! at or below it belongs to the capture machinery and is discarded, the
//! first frame above it is the context's own activation and is reported as
//! the context's exact program counter, and every frame beyond that is a
//! return address and gets the minus-one adjustment so it lands inside the
//! calling instruction.

use crate::core::PhysicalAddress;

pub(super) fn walk_from_context<S: FnMut(PhysicalAddress) -> bool>(
    context: &libc::ucontext_t,
    mut skip: usize,
    mut sink: S,
) {
    let Some((pc, sp)) = registers(context) else { return };
    if pc == 0 {
        return;
    }
    let mut anchored = false;
    // SAFETY: each frame is consumed inside the callback and nothing borrowed
    // from it escapes; this is the signal-safe unsynchronized walk.
    unsafe {
        backtrace::trace_unsynchronized(|frame| {
            if !anchored {
                let cfa = frame.sp() as usize;
                if cfa == 0 || cfa <= sp {
                    return true;
                }
                anchored = true;
                // The context's own activation: report the exact context PC.
                // For a signal context this is the faulting instruction.
                return deliver(pc, &mut skip, &mut sink);
            }
            let ip = frame.ip() as usize;
            if ip <= 1 {
                return false;
            }
            deliver(ip - 1, &mut skip, &mut sink)
        });
    }
}

/// Plain walk of the current stack for targets without a context-capture
/// primitive. The capture machinery's own frames are included.
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
pub(super) fn walk_current<S: FnMut(PhysicalAddress) -> bool>(mut skip: usize, mut sink: S) {
    // SAFETY: as above; frames do not escape the callback.
    unsafe {
        backtrace::trace_unsynchronized(|frame| {
            let ip = frame.ip() as usize;
            if ip <= 1 {
                return false;
            }
            deliver(ip - 1, &mut skip, &mut sink)
        });
    }
}

fn deliver<S: FnMut(PhysicalAddress) -> bool>(
    address: usize,
    skip: &mut usize,
    sink: &mut S,
) -> bool {
    if *skip > 0 {
        *skip -= 1;
        return true;
    }
    sink(PhysicalAddress::new(address))
}

cfg_if::cfg_if! {
    if #[cfg(all(target_os = "linux", target_env = "gnu", target_arch = "x86_64"))] {
        fn registers(context: &libc::ucontext_t) -> Option<(usize, usize)> {
            let gregs = &context.uc_mcontext.gregs;
            Some((gregs[libc::REG_RIP as usize] as usize, gregs[libc::REG_RSP as usize] as usize))
        }
    } else if #[cfg(all(target_os = "linux", target_env = "gnu", target_arch = "aarch64"))] {
        fn registers(context: &libc::ucontext_t) -> Option<(usize, usize)> {
            Some((context.uc_mcontext.pc as usize, context.uc_mcontext.sp as usize))
        }
    } else if #[cfg(all(target_os = "macos", target_arch = "x86_64"))] {
        fn registers(context: &libc::ucontext_t) -> Option<(usize, usize)> {
            if context.uc_mcontext.is_null() {
                return None;
            }
            let state = unsafe { &(*context.uc_mcontext).__ss };
            Some((state.__rip as usize, state.__rsp as usize))
        }
    } else if #[cfg(all(target_os = "macos", target_arch = "aarch64"))] {
        fn registers(context: &libc::ucontext_t) -> Option<(usize, usize)> {
            if context.uc_mcontext.is_null() {
                return None;
            }
            let state = unsafe { &(*context.uc_mcontext).__ss };
            Some((state.__pc as usize, state.__sp as usize))
        }
    } else {
        fn registers(_context: &libc::ucontext_t) -> Option<(usize, usize)> {
            None
        }
    }
}
