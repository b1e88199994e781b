//! Logical stack frames and source locations

use std::ffi::OsString;

use crate::core::address::PhysicalAddress;
use crate::core::{demangle, encoding};

/// A source position in UTF-8 encoding.
///
/// `column` is zero where the debug-info backend does not supply one; an
/// empty `file_name` means the backend had no location for the frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceLocation {
    pub file_name: String,
    pub line: u32,
    pub column: u32,
}

/// A source position with the file name in the platform-native encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeSourceLocation {
    pub file_name: OsString,
    pub line: u32,
    pub column: u32,
}

/// One function activation as seen at source level.
///
/// A single [`PhysicalAddress`] expands into one or more logical frames: the
/// inlined callees first (flagged `is_inline`), the physical function last.
/// The frame keeps the backend's raw strings and converts on demand in the
/// accessors; nothing is precomputed.
#[derive(Debug, Clone, Default)]
pub struct LogicalFrame {
    physical: PhysicalAddress,
    is_inline: bool,
    raw_symbol: Vec<u8>,
    raw_file_name: Vec<u8>,
    line: u32,
    column: u32,
    maybe_mangled: bool,
}

impl LogicalFrame {
    pub(crate) fn new(
        physical: PhysicalAddress,
        is_inline: bool,
        raw_symbol: Vec<u8>,
        raw_file_name: Vec<u8>,
        line: u32,
        column: u32,
        maybe_mangled: bool,
    ) -> Self {
        Self { physical, is_inline, raw_symbol, raw_file_name, line, column, maybe_mangled }
    }

    /// The placeholder produced when an address resolves to nothing: empty
    /// symbol, empty file name, not inline.
    pub(crate) fn unresolved(physical: PhysicalAddress) -> Self {
        Self::new(physical, false, Vec::new(), Vec::new(), 0, 0, false)
    }

    pub(crate) fn mark_inline(&mut self) {
        self.is_inline = true;
    }

    /// The physical address this frame was expanded from.
    pub fn physical(&self) -> PhysicalAddress {
        self.physical
    }

    /// Whether this activation was inlined into the physical function.
    pub fn is_inline(&self) -> bool {
        self.is_inline
    }

    /// Whether this is the unresolved placeholder.
    pub fn is_unresolved(&self) -> bool {
        self.raw_symbol.is_empty() && self.raw_file_name.is_empty()
    }

    /// The function name, demangled where applicable, as sanitized UTF-8.
    ///
    /// Empty when the backend had no name for the frame.
    pub fn symbol(&self) -> String {
        if self.raw_symbol.is_empty() {
            return String::new();
        }
        let raw = encoding::sanitize_utf8(&self.raw_symbol);
        if self.maybe_mangled {
            if let Some(demangled) = demangle::demangle(&raw) {
                return demangled;
            }
        }
        raw
    }

    /// The function name in the platform-native encoding.
    pub fn symbol_os(&self) -> OsString {
        if self.maybe_mangled {
            let raw = encoding::sanitize_utf8(&self.raw_symbol);
            if let Some(demangled) = demangle::demangle(&raw) {
                return OsString::from(demangled);
            }
        }
        encoding::native_os_string(&self.raw_symbol)
    }

    /// The source position, with the file name as sanitized UTF-8.
    pub fn source(&self) -> SourceLocation {
        SourceLocation {
            file_name: encoding::sanitize_utf8(&self.raw_file_name),
            line: self.line,
            column: self.column,
        }
    }

    /// The source position in the platform-native encoding.
    pub fn source_os(&self) -> NativeSourceLocation {
        NativeSourceLocation {
            file_name: encoding::native_os_string(&self.raw_file_name),
            line: self.line,
            column: self.column,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_empty_and_not_inline() {
        let frame = LogicalFrame::unresolved(PhysicalAddress::new(0x1000));
        assert!(frame.is_unresolved());
        assert!(!frame.is_inline());
        assert_eq!(frame.physical(), PhysicalAddress::new(0x1000));
        assert_eq!(frame.symbol(), "");
        assert_eq!(frame.source(), SourceLocation::default());
    }

    #[test]
    fn accessors_demangle_flagged_names() {
        let frame = LogicalFrame::new(
            PhysicalAddress::new(0x2000),
            false,
            b"_ZN5outer5inner17h1122334455667788E".to_vec(),
            b"src/lib.rs".to_vec(),
            12,
            4,
            true,
        );
        assert!(frame.symbol().contains("outer::inner"), "{}", frame.symbol());
        assert_eq!(frame.source().file_name, "src/lib.rs");
        assert_eq!(frame.source().line, 12);
        assert_eq!(frame.source().column, 4);
    }

    #[test]
    fn raw_names_survive_when_demangling_does_not_apply() {
        let frame = LogicalFrame::new(
            PhysicalAddress::new(0x3000),
            true,
            b"plain_name".to_vec(),
            Vec::new(),
            0,
            0,
            true,
        );
        assert_eq!(frame.symbol(), "plain_name");
        assert!(frame.is_inline());
        assert!(!frame.is_unresolved());
    }
}
