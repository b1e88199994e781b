//! Physical stack-frame addresses and their wire form

use std::fmt;
use std::mem;
use std::str::FromStr;

/// Number of hex digits in a formatted address: two per byte of pointer.
const HEX_DIGITS: usize = mem::size_of::<usize>() * 2;

/// A single return address captured from a machine stack.
///
/// For a non-signal frame the value has already been decremented by one from
/// the unwound return address, so it points inside the calling instruction.
/// For a signal or trap frame it is the exact faulting program counter.
///
/// The zero value is the "absent" sentinel; it is never produced by capture.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysicalAddress(usize);

impl PhysicalAddress {
    /// Wrap a raw pointer-width value.
    pub const fn new(handle: usize) -> Self {
        Self(handle)
    }

    /// The raw pointer-width value.
    pub const fn handle(self) -> usize {
        self.0
    }

    /// Whether this is the absent sentinel.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The address widened to `u64`, as used by the wire form.
    pub const fn widen(self) -> u64 {
        self.0 as u64
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:0width$x}", self.0, width = HEX_DIGITS)
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Error returned when parsing a [`PhysicalAddress`] literal fails.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid physical address literal")]
pub struct ParseAddressError;

impl FromStr for PhysicalAddress {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").ok_or(ParseAddressError)?;
        usize::from_str_radix(digits, 16)
            .map(Self)
            .map_err(|_| ParseAddressError)
    }
}

/// Encode a trace for hand-off to another process.
///
/// The layout is a native-endian `usize` element count followed by that many
/// `u64`-widened addresses. This is the only binary format the library
/// dictates; it is what out-of-process consumers read from a pipe before
/// resolving the addresses against the sender.
pub fn encode_trace(trace: &[PhysicalAddress]) -> Vec<u8> {
    let mut out = Vec::with_capacity(mem::size_of::<usize>() + trace.len() * mem::size_of::<u64>());
    out.extend_from_slice(&trace.len().to_ne_bytes());
    for entry in trace {
        out.extend_from_slice(&entry.widen().to_ne_bytes());
    }
    out
}

/// Decode a trace previously produced by [`encode_trace`].
///
/// Returns `None` if the buffer is truncated or its length disagrees with the
/// leading count.
pub fn decode_trace(bytes: &[u8]) -> Option<Vec<PhysicalAddress>> {
    const COUNT_SIZE: usize = mem::size_of::<usize>();
    const ENTRY_SIZE: usize = mem::size_of::<u64>();

    let head = bytes.get(..COUNT_SIZE)?;
    let rest = &bytes[COUNT_SIZE..];

    let mut count_raw = [0u8; COUNT_SIZE];
    count_raw.copy_from_slice(head);
    let count = usize::from_ne_bytes(count_raw);

    if rest.len() != count.checked_mul(ENTRY_SIZE)? {
        return None;
    }

    let mut trace = Vec::with_capacity(count);
    for chunk in rest.chunks_exact(ENTRY_SIZE) {
        let mut raw = [0u8; ENTRY_SIZE];
        raw.copy_from_slice(chunk);
        trace.push(PhysicalAddress::new(u64::from_ne_bytes(raw) as usize));
    }
    Some(trace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_full_pointer_width() {
        let formatted = PhysicalAddress::new(0x1234).to_string();
        assert_eq!(formatted.len(), 2 + HEX_DIGITS);
        assert!(formatted.starts_with("0x"));
        assert!(formatted.ends_with("1234"));
        assert_eq!(PhysicalAddress::default().to_string(), format!("0x{}", "0".repeat(HEX_DIGITS)));
    }

    #[test]
    fn parse_is_the_inverse_of_format() {
        for handle in [0usize, 1, 0xdead_beef, usize::MAX] {
            let address = PhysicalAddress::new(handle);
            assert_eq!(address.to_string().parse::<PhysicalAddress>(), Ok(address));
        }
    }

    #[test]
    fn rejects_malformed_literals() {
        assert!("1234".parse::<PhysicalAddress>().is_err());
        assert!("0xzz".parse::<PhysicalAddress>().is_err());
        assert!("0x".parse::<PhysicalAddress>().is_err());
    }

    #[test]
    fn orders_by_numeric_handle() {
        assert!(PhysicalAddress::new(1) < PhysicalAddress::new(2));
        assert!(PhysicalAddress::default().is_null());
        assert!(!PhysicalAddress::new(1).is_null());
    }

    #[test]
    fn wire_round_trip() {
        let trace: Vec<_> = [0x1000usize, 0x2000, usize::MAX]
            .into_iter()
            .map(PhysicalAddress::new)
            .collect();
        assert_eq!(decode_trace(&encode_trace(&trace)).as_deref(), Some(&trace[..]));
        assert_eq!(decode_trace(&encode_trace(&[])).as_deref(), Some(&[][..]));
    }

    #[test]
    fn wire_rejects_truncation() {
        let encoded = encode_trace(&[PhysicalAddress::new(0x1000)]);
        assert!(decode_trace(&encoded[..encoded.len() - 1]).is_none());
        assert!(decode_trace(&encoded[..3]).is_none());
        let mut padded = encoded;
        padded.push(0);
        assert!(decode_trace(&padded).is_none());
    }
}
