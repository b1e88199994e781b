//! Core value types shared by capture and resolution

pub(crate) mod demangle;
pub mod encoding;

mod address;
mod errors;
mod frame;

pub use address::{decode_trace, encode_trace, ParseAddressError, PhysicalAddress};
pub use errors::{Error, Result};
pub use frame::{LogicalFrame, NativeSourceLocation, SourceLocation};
