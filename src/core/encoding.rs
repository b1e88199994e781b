//! String encoding helpers for backend-supplied names and paths
//!
//! Debug-info backends hand us raw byte strings (UTF-8 on DWARF platforms,
//! UTF-16-derived on Windows). The frame accessors offer the same data in two
//! encodings: sanitized UTF-8 and the platform-native one.

use std::cell::RefCell;
use std::ffi::OsString;

thread_local! {
    // Per-thread scratch for the strip loop, so repeated sanitization of
    // invalid input does not pay a fresh allocation ramp-up on every call.
    static SCRATCH: RefCell<String> = const { RefCell::new(String::new()) };
}

/// Produce a valid UTF-8 string by stripping invalid sequences.
///
/// Invalid bytes are dropped, not replaced, so the result contains exactly
/// the valid portions of the input. Applying this twice equals applying it
/// once, and valid UTF-8 input is preserved bit-exact.
pub fn sanitize_utf8(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(valid) => valid.to_owned(),
        Err(_) => SCRATCH.with(|scratch| {
            let mut out = scratch.borrow_mut();
            out.clear();
            let mut rest = bytes;
            loop {
                match std::str::from_utf8(rest) {
                    Ok(valid) => {
                        out.push_str(valid);
                        break;
                    }
                    Err(err) => {
                        if let Ok(valid) = std::str::from_utf8(&rest[..err.valid_up_to()]) {
                            out.push_str(valid);
                        }
                        match err.error_len() {
                            Some(invalid) => rest = &rest[err.valid_up_to() + invalid..],
                            // Truncated sequence at the end of input.
                            None => break,
                        }
                    }
                }
            }
            out.clone()
        }),
    }
}

/// The platform-native rendition of a raw backend string.
///
/// On Unix the backend bytes pass through untouched; elsewhere they are
/// sanitized into UTF-8 first.
pub(crate) fn native_os_string(bytes: &[u8]) -> OsString {
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStringExt;
        OsString::from_vec(bytes.to_vec())
    }
    #[cfg(not(unix))]
    {
        OsString::from(sanitize_utf8(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_valid_utf8() {
        for input in ["", "ascii", "snow\u{2603}man", "\u{10348}"] {
            assert_eq!(sanitize_utf8(input.as_bytes()), input);
        }
    }

    #[test]
    fn strips_invalid_bytes() {
        assert_eq!(sanitize_utf8(b"ab\xffcd"), "abcd");
        assert_eq!(sanitize_utf8(b"\xff\xfe"), "");
        // Truncated multi-byte sequence at the end.
        assert_eq!(sanitize_utf8(b"ok\xe2\x98"), "ok");
        // Overlong/stray continuation bytes in the middle.
        assert_eq!(sanitize_utf8(b"\x80left\x80right\x80"), "leftright");
    }

    #[test]
    fn sanitizing_is_a_projection() {
        for input in [&b"ab\xffcd"[..], b"\xf0\x28\x8c\x28", b"plain", b""] {
            let once = sanitize_utf8(input);
            let twice = sanitize_utf8(once.as_bytes());
            assert_eq!(once, twice);
        }
    }

    #[cfg(unix)]
    #[test]
    fn native_keeps_raw_bytes() {
        use std::os::unix::ffi::OsStrExt;
        let raw = b"ab\xffcd";
        assert_eq!(native_os_string(raw).as_os_str().as_bytes(), raw);
    }
}
