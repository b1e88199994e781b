//! Physical stack capture
//!
//! Produces the sequence of return addresses on the current call stack, on a
//! stack described by a captured register context, or on the stack a signal
//! handler was invoked for. Capture never fails: unwinder errors end the
//! sequence early and a short or empty trace is the only observable effect.
//!
//! The sink receives one [`PhysicalAddress`] per frame and returns `true` to
//! continue. The sink-driven forms take no locks and allocate nothing, so
//! context-based capture is safe from signal handlers.

use crate::core::PhysicalAddress;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;

        /// Machine context a capture can start from: the structure populated
        /// by `getcontext` or delivered to a signal handler.
        pub type NativeContext = libc::ucontext_t;
    } else if #[cfg(windows)] {
        mod windows;

        /// Machine context a capture can start from: the structure populated
        /// by the OS capture-context primitive or found in an exception
        /// record.
        pub type NativeContext = windows_sys::Win32::System::Diagnostics::Debug::CONTEXT;
    }
}

/// Capture the current thread's stack, skipping the first `skip` frames.
///
/// The capture machinery's own frame is hidden; `skip == 0` starts at the
/// caller of this function.
#[inline(never)]
pub fn capture<S: FnMut(PhysicalAddress) -> bool>(skip: usize, sink: S) {
    cfg_if::cfg_if! {
        if #[cfg(all(target_os = "linux", target_env = "gnu"))] {
            let mut context = std::mem::MaybeUninit::<NativeContext>::zeroed();
            if unsafe { libc::getcontext(context.as_mut_ptr()) } != 0 {
                return;
            }
            let context = unsafe { context.assume_init() };
            // One extra skipped frame hides this function itself.
            unix::walk_from_context(&context, skip + 1, sink);
        } else if #[cfg(unix)] {
            unix::walk_current(skip, sink);
        } else if #[cfg(windows)] {
            windows::capture_current(skip, sink);
        }
    }
}

/// Capture the stack described by `context`, skipping the first `skip`
/// frames. The context is not modified.
///
/// The first reported frame is the context's exact program counter; for a
/// signal context that is the faulting instruction, unadjusted. Outer frames
/// are return addresses decremented by one.
pub fn capture_from_context<S: FnMut(PhysicalAddress) -> bool>(
    context: &NativeContext,
    skip: usize,
    sink: S,
) {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            unix::walk_from_context(context, skip, sink);
        } else if #[cfg(windows)] {
            let mut copy = *context;
            windows::walk_from_context(&mut copy, skip, sink);
        }
    }
}

/// Like [`capture_from_context`], but the unwinder may reuse the context
/// storage in place instead of copying it.
pub fn capture_from_context_mut<S: FnMut(PhysicalAddress) -> bool>(
    context: &mut NativeContext,
    skip: usize,
    sink: S,
) {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            unix::walk_from_context(context, skip, sink);
        } else if #[cfg(windows)] {
            windows::walk_from_context(context, skip, sink);
        }
    }
}

/// Unbounded capture of the current thread's stack into a vector.
#[inline(never)]
pub fn capture_frames(skip: usize) -> Vec<PhysicalAddress> {
    let mut entries = Vec::with_capacity(16);
    capture(skip + 1, |entry| {
        entries.push(entry);
        true
    });
    entries
}

/// Bounded capture of the current thread's stack into `buffer`.
///
/// Capture stops as soon as the buffer is full. Returns the number of
/// entries written.
#[inline(never)]
pub fn capture_into(buffer: &mut [PhysicalAddress], skip: usize) -> usize {
    if buffer.is_empty() {
        return 0;
    }
    let mut written = 0;
    capture(skip + 1, |entry| {
        buffer[written] = entry;
        written += 1;
        written < buffer.len()
    });
    written
}

/// Unbounded capture from a context into a vector.
pub fn capture_frames_from_context(context: &NativeContext, skip: usize) -> Vec<PhysicalAddress> {
    let mut entries = Vec::with_capacity(16);
    capture_from_context(context, skip, |entry| {
        entries.push(entry);
        true
    });
    entries
}

/// Bounded capture from a context into `buffer`. Returns the number of
/// entries written.
pub fn capture_into_from_context(
    context: &NativeContext,
    buffer: &mut [PhysicalAddress],
    skip: usize,
) -> usize {
    if buffer.is_empty() {
        return 0;
    }
    let mut written = 0;
    capture_from_context(context, skip, |entry| {
        buffer[written] = entry;
        written += 1;
        written < buffer.len()
    });
    written
}
