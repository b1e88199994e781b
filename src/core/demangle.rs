//! Demangling helpers for Rust and C++ symbols

/// Demangle a possibly-mangled linkage name.
///
/// Returns `None` if the name does not look mangled or the demangler rejects
/// it; the caller falls back to the raw name in that case.
pub(crate) fn demangle(symbol: &str) -> Option<String> {
    if is_rust_mangled(symbol) {
        demangle_rust(symbol)
    } else if is_itanium_cpp_mangled(symbol) {
        // Legacy Rust names are Itanium-shaped; the heuristic above catches
        // them, so anything left here is plain C++.
        demangle_cpp(symbol)
    } else {
        None
    }
}

/// Heuristic: Rust v0 mangling starts with "_R"; legacy Rust rides on the
/// Itanium scheme with a trailing 17-hex-digit hash component.
fn is_rust_mangled(s: &str) -> bool {
    s.starts_with("_R") || looks_like_legacy_rust(s)
}

fn looks_like_legacy_rust(s: &str) -> bool {
    s.starts_with("_ZN") && s.contains("17h") && s.ends_with('E')
}

/// Heuristic: Itanium C++ mangling starts with "_Z".
fn is_itanium_cpp_mangled(s: &str) -> bool {
    s.starts_with("_Z")
}

fn demangle_rust(s: &str) -> Option<String> {
    match rustc_demangle::try_demangle(s) {
        Ok(sym) => Some(sym.to_string()).filter(|d| !d.is_empty()),
        Err(_) => None,
    }
}

fn demangle_cpp(s: &str) -> Option<String> {
    match cpp_demangle::Symbol::new(s) {
        Ok(sym) => Some(sym.to_string()).filter(|d| !d.is_empty()),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demangles_legacy_rust() {
        let demangled = demangle("_ZN9backsight4core8demangle17h0123456789abcdefE")
            .expect("legacy Rust name should demangle");
        assert!(demangled.contains("backsight::core::demangle"), "{demangled}");
    }

    #[test]
    fn demangles_itanium_cpp() {
        let demangled =
            demangle("_ZNSt6vectorIiSaIiEE9push_backERKi").expect("C++ name should demangle");
        assert!(demangled.contains("push_back"), "{demangled}");
    }

    #[test]
    fn passes_unmangled_names_through() {
        assert_eq!(demangle("main"), None);
        assert_eq!(demangle("some_plain_function"), None);
        assert_eq!(demangle(""), None);
    }
}
