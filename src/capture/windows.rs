//! Windows stack walking via the table-based unwinder

use windows_sys::Win32::System::Diagnostics::Debug::{
    RtlCaptureContext, RtlLookupFunctionEntry, RtlVirtualUnwind, CONTEXT,
};

use crate::core::PhysicalAddress;

const UNW_FLAG_NHANDLER: u32 = 0;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        fn instruction_ptr(context: &CONTEXT) -> u64 {
            context.Rip
        }

        /// A function with no unwind data did not touch the stack pointer;
        /// its caller's address sits right at `*SP`. The load is volatile
        /// because that memory is not part of the abstract machine's
        /// reachable object graph.
        unsafe fn skip_leaf_function(context: &mut CONTEXT) {
            context.Rip = std::ptr::read_volatile(context.Rsp as *const u64);
            context.Rsp += std::mem::size_of::<u64>() as u64;
        }
    } else if #[cfg(target_arch = "aarch64")] {
        fn instruction_ptr(context: &CONTEXT) -> u64 {
            context.Pc
        }

        /// A leaf function's return address is still in the link register
        /// (x30 in the register file union).
        unsafe fn skip_leaf_function(context: &mut CONTEXT) {
            context.Pc = context.Anonymous.X[30];
        }
    }
}

// Inlined into `capture` so the captured context belongs to the frame the
// extra skip below is meant to hide.
#[inline(always)]
pub(super) fn capture_current<S: FnMut(PhysicalAddress) -> bool>(skip: usize, sink: S) {
    let mut context = unsafe { std::mem::zeroed::<CONTEXT>() };
    unsafe { RtlCaptureContext(&mut context) };
    // One extra skipped frame hides the caller (`capture` itself).
    walk_from_context(&mut context, skip + 1, sink);
}

pub(super) fn walk_from_context<S: FnMut(PhysicalAddress) -> bool>(
    context: &mut CONTEXT,
    mut skip: usize,
    mut sink: S,
) {
    let mut topmost = true;
    loop {
        let pc = instruction_ptr(context);
        if pc == 0 {
            return;
        }

        // The topmost frame is the context's own activation and is reported
        // exactly; for an exception context that is the faulting
        // instruction. Every outer frame is a return address pointing past
        // its call and steps back inside it.
        let address = if topmost { pc } else { pc - 1 };
        topmost = false;
        if skip > 0 {
            skip -= 1;
        } else if !sink(PhysicalAddress::new(address as usize)) {
            return;
        }

        let mut image_base = 0u64;
        let function_entry =
            unsafe { RtlLookupFunctionEntry(pc, &mut image_base, std::ptr::null_mut()) };
        if function_entry.is_null() {
            unsafe { skip_leaf_function(context) };
            continue;
        }

        let mut handler_data: *mut std::ffi::c_void = std::ptr::null_mut();
        let mut establisher_frame = 0u64;
        unsafe {
            RtlVirtualUnwind(
                UNW_FLAG_NHANDLER,
                image_base,
                pc,
                function_entry,
                context,
                &mut handler_data,
                &mut establisher_frame,
                std::ptr::null_mut(),
            );
        }
    }
}
