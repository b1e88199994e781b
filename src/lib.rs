//! Stack-trace capture and symbolization
//!
//! Capture records the return addresses on a call stack — the current one, a
//! stack described by a CPU register snapshot, or the stack a signal handler
//! was invoked for. Resolution expands each captured address into its chain
//! of logical frames (function, file, line, column, inline flag), including
//! the activations the optimizer inlined away, and works both for the
//! current process and for a foreign one described by its memory-map file.
//!
//! ```no_run
//! let trace = backsight::capture_frames(0);
//! let resolver = backsight::Resolver::new();
//! for physical in &trace {
//!     resolver.resolve(*physical, |frame| {
//!         println!("{} {} [{}]", physical, frame.symbol(), frame.source().file_name);
//!         true
//!     });
//! }
//! ```

// Core value types
pub mod core;

// Capture and resolution pipelines
pub mod capture;
pub mod maps;
pub mod resolver;

// Internal utilities
mod util;

// Re-export the main public API
pub use capture::{
    capture, capture_from_context, capture_from_context_mut, capture_frames,
    capture_frames_from_context, capture_into, capture_into_from_context, NativeContext,
};
pub use core::{
    decode_trace, encode_trace, Error, LogicalFrame, NativeSourceLocation, ParseAddressError,
    PhysicalAddress, Result, SourceLocation,
};
pub use maps::ModuleInfo;
pub use resolver::Resolver;
